//! Meta result accessors.
//!
//! Hooks report what they did through the [`MetaGlobals`] block Metamod
//! hands over at attach. [`set_result`] can only raise the current result
//! within one hook invocation; an attempt to lower it is discarded. The
//! `return_meta*` helpers assign the result as given, for the final word on
//! the way out of a hook.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::metamod::types::{MetaGlobals, MetaResult};

/// Globals supplied by `Meta_Attach`; null until then.
static META_GLOBALS: AtomicPtr<MetaGlobals> = AtomicPtr::new(ptr::null_mut());

pub(crate) fn set_globals(globals: *mut MetaGlobals) {
    META_GLOBALS.store(globals, Ordering::Release);
}

fn with_globals<T>(f: impl FnOnce(&mut MetaGlobals) -> T) -> Option<T> {
    let globals = META_GLOBALS.load(Ordering::Acquire);
    if globals.is_null() {
        return None;
    }

    // SAFETY: Metamod keeps the globals alive while the plugin is attached,
    // and hooks run on the engine thread only.
    Some(f(unsafe { &mut *globals }))
}

impl MetaGlobals {
    /// Raise the running hook's result; lower or equal results are dropped.
    pub fn raise(&mut self, result: MetaResult) {
        if self.mres < result {
            self.mres = result;
        }
    }

    /// Read the real function's return value.
    ///
    /// # Safety
    /// `orig_ret` must point to a `T` for the hooked function.
    pub unsafe fn orig<T: Copy>(&self) -> Option<T> {
        self.orig_ret.cast::<T>().as_ref().copied()
    }

    /// Read the overriding plugin's return value.
    ///
    /// # Safety
    /// `override_ret` must point to a `T` for the hooked function.
    pub unsafe fn overridden<T: Copy>(&self) -> Option<T> {
        self.override_ret.cast::<T>().as_ref().copied()
    }

    /// Original or overridden value, depending on the status so far.
    ///
    /// # Safety
    /// Same requirements as [`MetaGlobals::orig`] and [`MetaGlobals::overridden`].
    pub unsafe fn effective<T: Copy>(&self) -> Option<T> {
        if self.status < MetaResult::Override {
            self.orig()
        } else {
            self.overridden()
        }
    }
}

/// Sets the meta result of the running hook.
pub fn set_result(result: MetaResult) {
    with_globals(|g| g.raise(result));
}

/// Result the running hook has set so far.
pub fn current_result() -> MetaResult {
    with_globals(|g| g.mres).unwrap_or_default()
}

/// Highest result so far across the chain.
pub fn result_status() -> MetaResult {
    with_globals(|g| g.status).unwrap_or_default()
}

/// Result of the previously called plugin.
pub fn previous_result() -> MetaResult {
    with_globals(|g| g.prev_mres).unwrap_or_default()
}

/// Return value of the real function, in post hooks.
///
/// # Safety
/// `T` must be the return type of the hooked function.
pub unsafe fn orig_ret<T: Copy>() -> Option<T> {
    with_globals(|g| g.orig::<T>()).flatten()
}

/// Return value of the overriding or superceding plugin.
///
/// # Safety
/// `T` must be the return type of the hooked function.
pub unsafe fn override_ret<T: Copy>() -> Option<T> {
    with_globals(|g| g.overridden::<T>()).flatten()
}

/// Original or overridden return value.
///
/// # Safety
/// `T` must be the return type of the hooked function.
pub unsafe fn ret_value<T: Copy>() -> Option<T> {
    with_globals(|g| g.effective::<T>()).flatten()
}

/// Assign the result and leave a void hook. Unlike [`set_result`] this may
/// lower a result set earlier in the same hook.
///
/// Use as `return return_meta(MetaResult::Ignored);`.
pub fn return_meta(result: MetaResult) {
    with_globals(|g| g.mres = result);
}

/// Assign the result and hand back the hook's return value in one step, so
/// an override never goes out without its value.
pub fn return_meta_value<T>(result: MetaResult, value: T) -> T {
    return_meta(result);
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::PROCESS_STATE;
    use std::ffi::c_void;

    fn globals() -> MetaGlobals {
        MetaGlobals {
            mres: MetaResult::Unset,
            prev_mres: MetaResult::Unset,
            status: MetaResult::Unset,
            orig_ret: ptr::null_mut(),
            override_ret: ptr::null_mut(),
        }
    }

    #[test]
    fn test_result_order() {
        assert!(MetaResult::Unset < MetaResult::Ignored);
        assert!(MetaResult::Ignored < MetaResult::Handled);
        assert!(MetaResult::Handled < MetaResult::Override);
        assert!(MetaResult::Override < MetaResult::Supercede);
    }

    #[test]
    fn test_raise_never_lowers() {
        let mut g = globals();

        g.raise(MetaResult::Handled);
        g.raise(MetaResult::Ignored);
        assert_eq!(g.mres, MetaResult::Handled);

        g.raise(MetaResult::Supercede);
        g.raise(MetaResult::Override);
        assert_eq!(g.mres, MetaResult::Supercede);
    }

    #[test]
    fn test_effective_follows_status() {
        let mut orig: i32 = 1;
        let mut over: i32 = 2;
        let mut g = globals();
        g.orig_ret = (&raw mut orig).cast::<c_void>();
        g.override_ret = (&raw mut over).cast::<c_void>();

        g.status = MetaResult::Handled;
        assert_eq!(unsafe { g.effective::<i32>() }, Some(1));

        g.status = MetaResult::Override;
        assert_eq!(unsafe { g.effective::<i32>() }, Some(2));
    }

    #[test]
    fn test_null_slots_read_as_none() {
        let g = globals();
        assert_eq!(unsafe { g.orig::<i32>() }, None);
        assert_eq!(unsafe { g.overridden::<i32>() }, None);
    }

    #[test]
    fn test_accessors_go_through_attached_globals() {
        let _state = PROCESS_STATE.lock();

        let mut orig: i32 = 1;
        let mut over: i32 = 9;
        let mut g = globals();
        g.orig_ret = (&raw mut orig).cast::<c_void>();
        g.override_ret = (&raw mut over).cast::<c_void>();
        set_globals(&raw mut g);

        set_result(MetaResult::Supercede);
        set_result(MetaResult::Handled);
        assert_eq!(current_result(), MetaResult::Supercede);

        // the return helpers have the final word
        assert_eq!(return_meta_value(MetaResult::Ignored, 5), 5);
        assert_eq!(current_result(), MetaResult::Ignored);
        return_meta(MetaResult::Handled);
        assert_eq!(current_result(), MetaResult::Handled);

        with_globals(|g| g.status = MetaResult::Handled);
        assert_eq!(unsafe { ret_value::<i32>() }, Some(1));
        with_globals(|g| g.status = MetaResult::Override);
        assert_eq!(unsafe { ret_value::<i32>() }, Some(9));
        assert_eq!(unsafe { orig_ret::<i32>() }, Some(1));
        assert_eq!(result_status(), MetaResult::Override);

        set_globals(ptr::null_mut());
        assert_eq!(current_result(), MetaResult::Unset);
        assert_eq!(unsafe { ret_value::<i32>() }, None);
        return_meta(MetaResult::Supercede);
    }
}

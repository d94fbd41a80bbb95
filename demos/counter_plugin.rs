//! Connect Counter
//!
//! Small Metamod plugin built on `metamod_hooks`:
//! - a pre `ClientConnect` hook fans out to in-process rules through a
//!   [`Chain`] and reports the chain's verdict back to Metamod
//! - a post `ClientConnect` hook counts the connections the game accepted
//! - a pre `GameShutdown` hook logs the total

use std::ffi::{c_char, c_int, CStr};
use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

use metamod_hooks::metamod::tables::Edict;
use metamod_hooks::{
    hook_dll, hook_dll_new, metamod_plugin, result, CallContext, Chain, MetaPlugin, MetaResult, Outcome, Phase,
    PluginError, PluginLoadTime, PluginUnloadReason,
};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// Size of the engine's reject reason buffer
const REJECT_REASON_LEN: usize = 128;

/// Addresses refused at connect
const BLOCKED_PREFIXES: &[&str] = &["10.66."];

static ACCEPTED: AtomicU64 = AtomicU64::new(0);
static REJECTED: AtomicU64 = AtomicU64::new(0);

/// Rules consulted on every connect; the value is the game's return value.
static CONNECT_RULES: Lazy<Mutex<Chain<ConnectArgs, c_int>>> = Lazy::new(|| Mutex::new(Chain::new()));

struct ConnectArgs {
    name: String,
    address: String,
}

unsafe fn lossy(s: *const c_char) -> String {
    if s.is_null() {
        return String::new();
    }
    CStr::from_ptr(s).to_string_lossy().into_owned()
}

unsafe fn write_reject_reason(buf: *mut c_char, reason: &str) {
    if buf.is_null() {
        return;
    }
    let len = reason.len().min(REJECT_REASON_LEN - 1);
    ptr::copy_nonoverlapping(reason.as_ptr().cast::<c_char>(), buf, len);
    *buf.add(len) = 0;
}

fn build_rules(chain: &mut Chain<ConnectArgs, c_int>) {
    chain.clear();

    chain.push(Phase::Pre, |args: &ConnectArgs, ctx: &mut CallContext<c_int>| {
        if args.name.trim().is_empty() {
            ctx.set(Outcome::Supercede(0));
        } else {
            ctx.set(Outcome::Ignored);
        }
    });

    chain.push(Phase::Pre, |args: &ConnectArgs, ctx: &mut CallContext<c_int>| {
        // someone already refused
        if ctx.status() == MetaResult::Supercede {
            return;
        }
        if BLOCKED_PREFIXES.iter().any(|p| args.address.starts_with(p)) {
            ctx.set(Outcome::Supercede(0));
        }
    });

    chain.push(Phase::Post, |args: &ConnectArgs, ctx: &mut CallContext<c_int>| {
        tracing::debug!("{} ({}) passed connect rules", args.name, args.address);
        ctx.set(Outcome::Handled);
    });
}

unsafe extern "C" fn client_connect(
    _entity: *mut Edict,
    name: *const c_char,
    address: *const c_char,
    reject_reason: *mut c_char,
) -> c_int {
    let args = ConnectArgs {
        name: lossy(name),
        address: lossy(address),
    };

    // The game decides by default; the rules only step in to refuse
    let outcome = CONNECT_RULES.lock().call(&args, |_| 1);

    if outcome.status == MetaResult::Supercede {
        REJECTED.fetch_add(1, Ordering::Relaxed);
        tracing::info!("Refused {} from {}", args.name, args.address);
        write_reject_reason(reject_reason, "Connection refused by server rules");
    }

    result::return_meta_value(outcome.status.max(MetaResult::Ignored), outcome.value)
}

unsafe extern "C" fn client_connect_post(
    _entity: *mut Edict,
    _name: *const c_char,
    _address: *const c_char,
    _reject_reason: *mut c_char,
) -> c_int {
    if result::orig_ret::<c_int>().unwrap_or(0) != 0 {
        ACCEPTED.fetch_add(1, Ordering::Relaxed);
    }

    result::return_meta_value(MetaResult::Ignored, 0)
}

unsafe extern "C" fn game_shutdown() {
    tracing::info!(
        "Connections: {} accepted, {} refused",
        ACCEPTED.load(Ordering::Relaxed),
        REJECTED.load(Ordering::Relaxed)
    );
    result::return_meta(MetaResult::Ignored);
}

#[derive(Default)]
struct Counter;

impl MetaPlugin for Counter {
    fn on_attach(&mut self, now: PluginLoadTime) -> Result<(), PluginError> {
        build_rules(&mut CONNECT_RULES.lock());

        hook_dll(Phase::Pre, |t| t.pfn_client_connect = Some(client_connect))?;
        hook_dll(Phase::Post, |t| t.pfn_client_connect = Some(client_connect_post))?;
        hook_dll_new(Phase::Pre, |t| t.pfn_game_shutdown = Some(game_shutdown))?;

        tracing::info!("Connect counter attached ({now:?})");
        Ok(())
    }

    fn on_detach(&mut self, _now: PluginLoadTime, reason: PluginUnloadReason) {
        CONNECT_RULES.lock().clear();
        tracing::info!("Connect counter detached ({reason:?})");
    }
}

metamod_plugin! {
    plugin: Counter,
    name: "Connect Counter",
    version: "0.3.0",
    date: "2026",
    author: "metamod-hooks",
    url: "https://github.com/metamod-hooks/metamod-hooks",
    logtag: "COUNTER",
    loadable: AnyTime,
    unloadable: AnyPause,
}

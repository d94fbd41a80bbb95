//! In-process hook chains.
//!
//! A [`Chain`] runs any number of interceptors around one provider of record
//! and settles their results the same way Metamod settles plugin results:
//!
//! 1. pre interceptors run in registration order
//! 2. the provider runs unless the status reached `Supercede`
//! 3. post interceptors run in registration order, seeing the original value
//! 4. the caller gets the original value below `Override`, the override
//!    value otherwise
//!
//! After each interceptor returns, its result becomes the previous result,
//! the status becomes the maximum seen so far, and the current result is
//! reset to `Unset` for the next interceptor.

use std::any::Any;
use std::collections::HashMap;

use crate::error::HookError;
use crate::hooks::Phase;
use crate::metamod::types::MetaResult;

// =============================================================================
// Outcome
// =============================================================================

/// What an interceptor decided.
///
/// Overriding results carry their return value, so an override can never be
/// reported without one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<R> {
    /// Took no action
    Ignored,
    /// Did something; the provider still runs
    Handled,
    /// The provider runs, but the caller gets this value
    Override(R),
    /// The provider is skipped; the caller gets this value
    Supercede(R),
}

impl<R> Outcome<R> {
    /// Result code of this outcome.
    pub fn result(&self) -> MetaResult {
        match self {
            Self::Ignored => MetaResult::Ignored,
            Self::Handled => MetaResult::Handled,
            Self::Override(_) => MetaResult::Override,
            Self::Supercede(_) => MetaResult::Supercede,
        }
    }

    fn into_value(self) -> Option<R> {
        match self {
            Self::Ignored | Self::Handled => None,
            Self::Override(value) | Self::Supercede(value) => Some(value),
        }
    }
}

// =============================================================================
// Call Context
// =============================================================================

/// State shared by every interceptor of one logical call.
#[derive(Debug)]
pub struct CallContext<R> {
    current: MetaResult,
    current_value: Option<R>,
    previous: MetaResult,
    status: MetaResult,
    original: Option<R>,
    override_value: Option<R>,
}

impl<R> CallContext<R> {
    fn new() -> Self {
        Self {
            current: MetaResult::Unset,
            current_value: None,
            previous: MetaResult::Unset,
            status: MetaResult::Unset,
            original: None,
            override_value: None,
        }
    }

    /// Report the running interceptor's outcome.
    ///
    /// Only raises: an outcome ranked at or below the one already set by this
    /// interceptor is dropped together with its value.
    pub fn set(&mut self, outcome: Outcome<R>) {
        let result = outcome.result();
        if result <= self.current {
            return;
        }

        self.current = result;
        self.current_value = outcome.into_value();
    }

    /// Result set so far by the running interceptor.
    pub fn result(&self) -> MetaResult {
        self.current
    }

    /// Result of the interceptor that ran before this one.
    pub fn previous_result(&self) -> MetaResult {
        self.previous
    }

    /// Highest result so far in this call.
    pub fn status(&self) -> MetaResult {
        self.status
    }

    /// Provider's return value; only present in post interceptors, and only
    /// when the provider was not superceded.
    pub fn original(&self) -> Option<&R> {
        self.original.as_ref()
    }

    /// Value of the interceptor that currently dominates the call.
    pub fn overridden(&self) -> Option<&R> {
        self.override_value.as_ref()
    }

    /// Value the caller would get if the chain ended now.
    pub fn return_value(&self) -> Option<&R> {
        if self.status < MetaResult::Override {
            self.original()
        } else {
            self.overridden()
        }
    }

    /// Fold the running interceptor's result into the call state.
    fn settle(&mut self) {
        let result = std::mem::take(&mut self.current);
        let value = self.current_value.take();

        // ties go to the later interceptor
        if result >= MetaResult::Override && result >= self.status {
            self.override_value = value;
        }

        self.previous = result;
        self.status = self.status.max(result);
    }
}

// =============================================================================
// Chain
// =============================================================================

/// Interceptor bound to one operation.
pub type Interceptor<A, R> = Box<dyn FnMut(&A, &mut CallContext<R>) + Send>;

/// Result of one dispatched call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome<R> {
    /// Value handed back to the caller
    pub value: R,
    /// Highest result of the chain
    pub status: MetaResult,
    /// Whether the provider of record ran
    pub provider_called: bool,
}

/// Ordered pre and post interceptors for a single operation.
pub struct Chain<A, R> {
    pre: Vec<Interceptor<A, R>>,
    post: Vec<Interceptor<A, R>>,
}

impl<A, R> Chain<A, R> {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self {
            pre: Vec::new(),
            post: Vec::new(),
        }
    }

    /// Append an interceptor to the given phase.
    pub fn push<F>(&mut self, phase: Phase, interceptor: F)
    where
        F: FnMut(&A, &mut CallContext<R>) + Send + 'static,
    {
        match phase {
            Phase::Pre => self.pre.push(Box::new(interceptor)),
            Phase::Post => self.post.push(Box::new(interceptor)),
        }
    }

    /// Number of interceptors in a phase.
    pub fn len(&self, phase: Phase) -> usize {
        match phase {
            Phase::Pre => self.pre.len(),
            Phase::Post => self.post.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pre.is_empty() && self.post.is_empty()
    }

    /// Drop every interceptor.
    pub fn clear(&mut self) {
        self.pre.clear();
        self.post.clear();
    }

    /// Run one logical call through the chain.
    pub fn call(&mut self, args: &A, provider: impl FnOnce(&A) -> R) -> CallOutcome<R> {
        let mut ctx = CallContext::new();

        for interceptor in &mut self.pre {
            interceptor(args, &mut ctx);
            ctx.settle();
        }

        let provider_called = ctx.status < MetaResult::Supercede;
        if provider_called {
            ctx.original = Some(provider(args));
        }

        for interceptor in &mut self.post {
            interceptor(args, &mut ctx);
            ctx.settle();
        }

        let status = ctx.status;
        let value = if status < MetaResult::Override {
            ctx.original
        } else {
            ctx.override_value
        };

        match value {
            Some(value) => CallOutcome {
                value,
                status,
                provider_called,
            },
            // Below Supercede the provider ran; at Override and above the
            // dominating outcome carried a value.
            None => unreachable!("hook chain settled at {status:?} without a return value"),
        }
    }
}

impl<A, R> Default for Chain<A, R> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Chain Table
// =============================================================================

/// Type-erased view of a chain, so one table can hold differing signatures.
trait AnyChain: Send {
    fn len(&self, phase: Phase) -> usize;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<A: 'static, R: 'static> AnyChain for Chain<A, R> {
    fn len(&self, phase: Phase) -> usize {
        Chain::len(self, phase)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Chains for every operation of one interface, keyed by operation name.
pub struct ChainTable {
    interface: &'static str,
    chains: HashMap<&'static str, Box<dyn AnyChain>>,
}

impl ChainTable {
    /// Create an empty table for the named interface.
    pub fn new(interface: &'static str) -> Self {
        Self {
            interface,
            chains: HashMap::new(),
        }
    }

    /// Interface name used in logs.
    pub fn interface(&self) -> &'static str {
        self.interface
    }

    /// Bind an interceptor to an operation.
    ///
    /// The first registration fixes the operation's signature; a later
    /// registration with different argument or return types is refused.
    pub fn register<A, R, F>(&mut self, op: &'static str, phase: Phase, interceptor: F) -> Result<(), HookError>
    where
        A: 'static,
        R: 'static,
        F: FnMut(&A, &mut CallContext<R>) + Send + 'static,
    {
        let table = self.interface;
        let chain = self
            .chains
            .entry(op)
            .or_insert_with(|| Box::new(Chain::<A, R>::new()) as Box<dyn AnyChain>)
            .as_any_mut()
            .downcast_mut::<Chain<A, R>>()
            .ok_or(HookError::SignatureMismatch { table, op })?;

        chain.push(phase, interceptor);
        Ok(())
    }

    /// Call an operation through its chain, or straight through to the
    /// provider when nothing is registered for it.
    pub fn dispatch<A, R>(&mut self, op: &'static str, args: &A, provider: impl FnOnce(&A) -> R) -> CallOutcome<R>
    where
        A: 'static,
        R: 'static,
    {
        let chain = self
            .chains
            .get_mut(op)
            .and_then(|chain| chain.as_any_mut().downcast_mut::<Chain<A, R>>());

        match chain {
            Some(chain) => chain.call(args, provider),
            None => {
                if self.chains.contains_key(op) {
                    tracing::warn!(
                        "{}: {op} dispatched with a foreign signature; interceptors skipped",
                        self.interface
                    );
                }

                CallOutcome {
                    value: provider(args),
                    status: MetaResult::Unset,
                    provider_called: true,
                }
            }
        }
    }

    /// Number of interceptors bound to an operation in a phase.
    pub fn interceptor_count(&self, op: &str, phase: Phase) -> usize {
        self.chains.get(op).map_or(0, |chain| chain.len(phase))
    }

    /// Unbind every interceptor of every operation.
    pub fn clear(&mut self) {
        self.chains.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const CODES: [MetaResult; 5] = [
        MetaResult::Unset,
        MetaResult::Ignored,
        MetaResult::Handled,
        MetaResult::Override,
        MetaResult::Supercede,
    ];

    /// Outcome for a code, tagging override values with the interceptor index.
    fn outcome_for(code: MetaResult, tag: i32) -> Option<Outcome<i32>> {
        match code {
            MetaResult::Unset => None,
            MetaResult::Ignored => Some(Outcome::Ignored),
            MetaResult::Handled => Some(Outcome::Handled),
            MetaResult::Override => Some(Outcome::Override(tag)),
            MetaResult::Supercede => Some(Outcome::Supercede(tag)),
        }
    }

    fn chain_of(pre: &[MetaResult], post: &[MetaResult]) -> Chain<(), i32> {
        let mut chain = Chain::new();
        for (i, &code) in pre.iter().enumerate() {
            let tag = 100 + i as i32;
            chain.push(Phase::Pre, move |_: &(), ctx: &mut CallContext<i32>| {
                if let Some(outcome) = outcome_for(code, tag) {
                    ctx.set(outcome);
                }
            });
        }
        for (i, &code) in post.iter().enumerate() {
            let tag = 200 + i as i32;
            chain.push(Phase::Post, move |_: &(), ctx: &mut CallContext<i32>| {
                if let Some(outcome) = outcome_for(code, tag) {
                    ctx.set(outcome);
                }
            });
        }
        chain
    }

    #[test]
    fn test_status_is_max_of_all_results() {
        for &a in &CODES {
            for &b in &CODES {
                for &c in &CODES {
                    let mut chain = chain_of(&[a, b], &[c]);
                    let outcome = chain.call(&(), |_| 0);
                    assert_eq!(outcome.status, a.max(b).max(c), "codes {a:?} {b:?} {c:?}");
                }
            }
        }
    }

    #[test]
    fn test_provider_runs_once_below_supercede() {
        for &a in &CODES[..4] {
            for &b in &CODES[..4] {
                let calls = Arc::new(AtomicUsize::new(0));
                let counter = calls.clone();
                let mut chain = chain_of(&[a, b], &[]);

                let outcome = chain.call(&(), move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    7
                });

                assert!(outcome.provider_called);
                assert_eq!(calls.load(Ordering::SeqCst), 1);
            }
        }
    }

    #[test]
    fn test_supercede_skips_provider() {
        for &other in &CODES {
            let mut chain = chain_of(&[other, MetaResult::Supercede], &[]);
            let outcome = chain.call(&(), |_| -> i32 { panic!("provider must not run") });

            assert!(!outcome.provider_called);
            assert_eq!(outcome.status, MetaResult::Supercede);
        }
    }

    #[test]
    fn test_effective_value() {
        let mut chain = chain_of(&[MetaResult::Handled], &[MetaResult::Ignored]);
        assert_eq!(chain.call(&(), |_| 5).value, 5);

        let mut chain = chain_of(&[MetaResult::Ignored, MetaResult::Override], &[]);
        let outcome = chain.call(&(), |_| 5);
        assert!(outcome.provider_called);
        assert_eq!(outcome.value, 101);

        let mut chain = chain_of(&[], &[MetaResult::Override]);
        assert_eq!(chain.call(&(), |_| 5).value, 200);
    }

    #[test]
    fn test_dominating_override_wins() {
        // supercede outranks a later override
        let mut chain = chain_of(&[MetaResult::Supercede, MetaResult::Override], &[]);
        assert_eq!(chain.call(&(), |_| 0).value, 100);

        // equal rank: the later interceptor wins
        let mut chain = chain_of(&[MetaResult::Override, MetaResult::Override], &[]);
        assert_eq!(chain.call(&(), |_| 0).value, 101);
    }

    #[test]
    fn test_interceptor_cannot_lower_result() {
        let mut chain: Chain<(), i32> = Chain::new();
        chain.push(Phase::Pre, |_, ctx| {
            ctx.set(Outcome::Handled);
            ctx.set(Outcome::Ignored);
            assert_eq!(ctx.result(), MetaResult::Handled);
        });
        chain.push(Phase::Pre, |_, ctx| {
            assert_eq!(ctx.previous_result(), MetaResult::Handled);
            assert_eq!(ctx.result(), MetaResult::Unset);
        });

        assert_eq!(chain.call(&(), |_| 1).status, MetaResult::Handled);
    }

    #[test]
    fn test_lower_override_keeps_first_value() {
        let mut chain: Chain<(), i32> = Chain::new();
        chain.push(Phase::Pre, |_, ctx| {
            ctx.set(Outcome::Supercede(9));
            ctx.set(Outcome::Override(3));
        });

        assert_eq!(chain.call(&(), |_| 1).value, 9);
    }

    #[test]
    fn test_post_sees_original_and_status() {
        let mut chain: Chain<i32, i32> = Chain::new();
        chain.push(Phase::Pre, |_, ctx| {
            assert_eq!(ctx.original(), None);
            ctx.set(Outcome::Override(42));
        });
        chain.push(Phase::Post, |args, ctx| {
            assert_eq!(ctx.original(), Some(&(args * 2)));
            assert_eq!(ctx.status(), MetaResult::Override);
            assert_eq!(ctx.return_value(), Some(&42));
        });

        let outcome = chain.call(&4, |x| x * 2);
        assert_eq!(outcome.value, 42);
    }

    #[test]
    fn test_status_resets_between_calls() {
        let mut chain: Chain<bool, i32> = Chain::new();
        chain.push(Phase::Pre, |supercede, ctx| {
            assert_eq!(ctx.status(), MetaResult::Unset);
            if *supercede {
                ctx.set(Outcome::Supercede(-1));
            }
        });

        assert_eq!(chain.call(&true, |_| 1).value, -1);
        let outcome = chain.call(&false, |_| 1);
        assert_eq!(outcome.value, 1);
        assert_eq!(outcome.status, MetaResult::Unset);
    }

    #[test]
    fn test_table_dispatch_and_clear() {
        let mut table = ChainTable::new("engine");
        table
            .register::<String, i32, _>("PrecacheModel", Phase::Pre, |_: &String, ctx: &mut CallContext<i32>| {
                ctx.set(Outcome::Supercede(77));
            })
            .unwrap();
        table
            .register::<String, i32, _>("PrecacheModel", Phase::Post, |_: &String, ctx: &mut CallContext<i32>| {
                ctx.set(Outcome::Ignored);
            })
            .unwrap();

        assert_eq!(table.interceptor_count("PrecacheModel", Phase::Pre), 1);
        assert_eq!(table.interceptor_count("PrecacheModel", Phase::Post), 1);

        let model = String::from("models/player.mdl");
        let outcome = table.dispatch("PrecacheModel", &model, |_| 1);
        assert_eq!(outcome.value, 77);
        assert!(!outcome.provider_called);

        table.clear();
        assert_eq!(table.interceptor_count("PrecacheModel", Phase::Pre), 0);
        assert_eq!(table.interceptor_count("PrecacheModel", Phase::Post), 0);

        let outcome = table.dispatch("PrecacheModel", &model, |_| 1);
        assert_eq!(outcome.value, 1);
        assert!(outcome.provider_called);
        assert_eq!(outcome.status, MetaResult::Unset);
    }

    #[test]
    fn test_table_rejects_foreign_signature() {
        let mut table = ChainTable::new("gamedll");
        table
            .register::<u32, i32, _>("Spawn", Phase::Pre, |_: &u32, _: &mut CallContext<i32>| {})
            .unwrap();

        let err = table
            .register::<u32, bool, _>("Spawn", Phase::Pre, |_: &u32, _: &mut CallContext<bool>| {})
            .unwrap_err();
        assert_eq!(
            err,
            HookError::SignatureMismatch {
                table: "gamedll",
                op: "Spawn"
            }
        );
    }

    #[test]
    fn test_foreign_signature_dispatch_skips_interceptors() {
        let mut table = ChainTable::new("gamedll");
        table
            .register::<u32, i32, _>("Spawn", Phase::Pre, |_: &u32, ctx: &mut CallContext<i32>| {
                ctx.set(Outcome::Supercede(-1));
            })
            .unwrap();

        let outcome = table.dispatch::<u32, bool>("Spawn", &3, |_| true);
        assert!(outcome.value);
        assert!(outcome.provider_called);
        assert_eq!(outcome.status, MetaResult::Unset);

        // the registered chain is left as it was
        assert_eq!(table.interceptor_count("Spawn", Phase::Pre), 1);
        let outcome = table.dispatch::<u32, i32>("Spawn", &3, |_| 0);
        assert_eq!(outcome.value, -1);
        assert!(!outcome.provider_called);
    }
}

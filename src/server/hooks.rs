//! Screen hook chains
//!
//! A legacy screen exposes a handful of window callbacks. Extensions wrap
//! them: each wrapper runs its own work around whatever handler was
//! installed before it, and must always call that handler. A [`HookChain`]
//! is the resolved list of wrappers around a base handler.
//!
//! ```text
//!   call ─► before(n) ─► ... ─► before(1) ─► base ─► after(1) ─► ... ─► after(n) ─► result
//! ```
//!
//! Wrapper `n` is the most recently installed and therefore outermost.

use super::{PixmapId, WindowId};

type BaseFn<C, A, R> = Box<dyn FnMut(&mut C, A) -> R>;
type BeforeFn<C, A> = Box<dyn FnMut(&mut C, A)>;
type AfterFn<C, A, R> = Box<dyn FnMut(&mut C, A, R) -> R>;

struct HookLayer<C, A, R> {
    name: &'static str,
    before: Option<BeforeFn<C, A>>,
    after: AfterFn<C, A, R>,
}

/// A base handler plus the wrappers installed around it
pub struct HookChain<C, A, R> {
    base: BaseFn<C, A, R>,
    layers: Vec<HookLayer<C, A, R>>,
}

impl<C, A: Copy, R> HookChain<C, A, R> {
    pub fn new(base: impl FnMut(&mut C, A) -> R + 'static) -> Self {
        Self {
            base: Box::new(base),
            layers: Vec::new(),
        }
    }

    /// Install a wrapper that only runs after the previous handler
    pub fn wrap(&mut self, name: &'static str, after: impl FnMut(&mut C, A, R) -> R + 'static) {
        self.layers.push(HookLayer {
            name,
            before: None,
            after: Box::new(after),
        });
    }

    /// Install a wrapper with work on both sides of the previous handler
    pub fn wrap_around(
        &mut self,
        name: &'static str,
        before: impl FnMut(&mut C, A) + 'static,
        after: impl FnMut(&mut C, A, R) -> R + 'static,
    ) {
        self.layers.push(HookLayer {
            name,
            before: Some(Box::new(before)),
            after: Box::new(after),
        });
    }

    pub fn call(&mut self, ctx: &mut C, arg: A) -> R {
        for layer in self.layers.iter_mut().rev() {
            if let Some(before) = layer.before.as_mut() {
                before(ctx, arg);
            }
        }

        let mut result = (self.base)(ctx, arg);

        for layer in self.layers.iter_mut() {
            result = (layer.after)(ctx, arg, result);
        }
        result
    }

    /// Wrapper names, innermost first
    pub fn layer_names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|l| l.name).collect()
    }

    pub fn is_wrapped_by(&self, name: &str) -> bool {
        self.layers.iter().any(|l| l.name == name)
    }
}

/// The window callbacks of one legacy screen
pub struct ScreenHooks<C> {
    pub create_window: HookChain<C, WindowId, bool>,
    pub realize_window: HookChain<C, WindowId, bool>,
    pub unrealize_window: HookChain<C, WindowId, bool>,
    pub set_window_pixmap: HookChain<C, (WindowId, PixmapId), ()>,
    pub move_window: HookChain<C, WindowId, ()>,
}

impl<C> ScreenHooks<C> {
    /// Chains whose base handlers do nothing and report success
    pub fn passthrough() -> Self {
        Self {
            create_window: HookChain::new(|_, _| true),
            realize_window: HookChain::new(|_, _| true),
            unrealize_window: HookChain::new(|_, _| true),
            set_window_pixmap: HookChain::new(|_, _| ()),
            move_window: HookChain::new(|_, _| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_around_base() {
        let mut chain: HookChain<Vec<String>, u32, u32> = HookChain::new(|log: &mut Vec<String>, arg| {
            log.push(format!("base {}", arg));
            arg
        });
        chain.wrap_around(
            "first",
            |log, _| log.push("before first".into()),
            |log, _, r| {
                log.push("after first".into());
                r + 1
            },
        );
        chain.wrap_around(
            "second",
            |log, _| log.push("before second".into()),
            |log, _, r| {
                log.push("after second".into());
                r * 10
            },
        );

        let mut log = Vec::new();
        let result = chain.call(&mut log, 4);

        assert_eq!(result, 50);
        assert_eq!(
            log,
            vec![
                "before second",
                "before first",
                "base 4",
                "after first",
                "after second"
            ]
        );
    }

    #[test]
    fn test_base_called_once_per_call() {
        let mut chain: HookChain<u32, (), ()> = HookChain::new(|count, _| *count += 1);
        chain.wrap("a", |_, _, r| r);
        chain.wrap("b", |_, _, r| r);

        let mut count = 0;
        chain.call(&mut count, ());
        chain.call(&mut count, ());
        assert_eq!(count, 2);
        assert_eq!(chain.layer_names(), vec!["a", "b"]);
        assert!(chain.is_wrapped_by("b"));
        assert!(!chain.is_wrapped_by("c"));
    }

    #[test]
    fn test_wrapper_sees_previous_result() {
        let mut chain: HookChain<(), WindowId, bool> = HookChain::new(|_, _| false);
        chain.wrap("guard", |_, _, prev| prev);

        assert!(!chain.call(&mut (), WindowId(1)));
    }
}

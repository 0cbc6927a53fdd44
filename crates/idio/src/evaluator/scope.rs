//! Compile-time lexical environment and the scope-resolution order
//! (spec §4.3): lexical frames, then the current module's own symbols,
//! then its imports (respecting exports), then an explicit `module/name`
//! qualification, and only then an auto-extend toplevel placeholder.

use crate::intern::SymbolId;
use crate::module::ModuleId;
use crate::symbol_info::SymbolInfo;

/// One lexical frame: the parameter names a `lambda` introduced, in
/// argument order. Frame 0 is the innermost (most recently entered).
#[derive(Debug, Clone, Default)]
pub struct LexFrame {
    pub names: Vec<SymbolId>,
    pub dotted: bool,
}

/// The chain of lexical frames in effect while compiling one expression,
/// innermost-first -- mirrors the runtime `Frame` parent chain exactly, so
/// a resolved `(depth, index)` pair addresses the same slot at both
/// compile time and run time.
#[derive(Debug, Clone, Default)]
pub struct LexEnv {
    frames: Vec<LexFrame>,
}

/// Where a name resolves at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Frame-relative: `(depth, index)`, depth 0 is the innermost frame.
    Lexical(u32, u32),
    /// Resolved through the module graph; carries nothing further, since
    /// the caller already has the `SymbolInfo` to hand.
    Module,
    /// Not found anywhere; the evaluator auto-extends the toplevel.
    Unbound,
}

impl LexEnv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn extended(&self, frame: LexFrame) -> Self {
        let mut frames = Vec::with_capacity(self.frames.len() + 1);
        frames.push(frame);
        frames.extend(self.frames.iter().cloned());
        Self { frames }
    }

    /// Step 1 of scope resolution (spec §4.3): walk lexical frames
    /// innermost-out looking for `name`.
    #[must_use]
    pub fn resolve_lexical(&self, name: SymbolId) -> Option<(u32, u32)> {
        for (depth, frame) in self.frames.iter().enumerate() {
            if let Some(index) = frame.names.iter().position(|&n| n == name) {
                return Some((u32::try_from(depth).expect("frame depth overflow"), u32::try_from(index).expect("frame index overflow")));
            }
        }
        None
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// Full scope resolution (spec §4.3 steps 1-4): lexical first, then
/// module-local/imports via [`crate::module::Modules::resolve`], then an
/// explicit qualification the caller has already split out, finally
/// `Resolution::Unbound` for the evaluator to treat as an implicit
/// toplevel `define`.
#[must_use]
pub fn resolve<'a>(
    lex: &LexEnv,
    modules: &'a crate::module::Modules,
    module: ModuleId,
    name: SymbolId,
) -> (Resolution, Option<&'a SymbolInfo>) {
    if let Some((depth, index)) = lex.resolve_lexical(name) {
        return (Resolution::Lexical(depth, index), None);
    }
    match modules.resolve(module, name) {
        Some(info) => (Resolution::Module, Some(info)),
        None => (Resolution::Unbound, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexical_resolution_prefers_innermost_frame() {
        let interns = crate::intern::Interns::new();
        let x = interns.intern_symbol("x");
        let outer = LexEnv::new().extended(LexFrame {
            names: vec![x],
            dotted: false,
        });
        let y = interns.intern_symbol("y");
        let inner = outer.extended(LexFrame {
            names: vec![y, x],
            dotted: false,
        });
        assert_eq!(inner.resolve_lexical(x), Some((0, 1)));
        assert_eq!(inner.resolve_lexical(y), Some((0, 0)));
    }
}

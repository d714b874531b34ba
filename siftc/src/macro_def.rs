use std::rc::Rc;

use crate::token::Token;

/// A macro definition held in the macro table.
///
/// Object-like macros have `params: None`; function-like macros carry their
/// parameter list. The body is shared so that cloning the table for nested
/// include processing stays cheap.
#[derive(Clone, Debug)]
pub struct MacroDef {
    pub(crate) params: Option<Vec<String>>,
    pub(crate) body: Rc<Vec<Token>>,
    pub(crate) is_variadic: bool,
    /// File and line of the `#define`, absent for predefined macros.
    pub(crate) location: Option<(String, usize)>,
}

impl MacroDef {
    /// Whether this macro takes arguments.
    #[must_use]
    pub fn is_function_like(&self) -> bool {
        self.params.is_some()
    }

    /// File and line where the macro was defined, if it came from source.
    #[must_use]
    pub fn location(&self) -> Option<(&str, usize)> {
        self.location.as_ref().map(|(f, l)| (f.as_str(), *l))
    }
}

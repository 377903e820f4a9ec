use std::any::Any;

use crate::error::GrammarError;
use crate::span::Span;
use crate::symbol::{RuleMap, SymbolFamily, SymbolHandle};

/// One node of a match-derived parse tree.
///
/// Tokens do not own their text; `span` indexes the matched source. The
/// `ordinal` disambiguates which alternative produced the token: the member
/// index for an ordered choice, the range index for a character class, and
/// 1 for a catch-all that consumed a character.
pub struct Token {
    origin: SymbolHandle,
    span: Span,
    ordinal: u32,
    children: Vec<Token>,
    payload: Option<Box<dyn Any>>,
}

impl Token {
    pub(crate) fn new(origin: SymbolHandle, span: Span, children: Vec<Token>) -> Token {
        Token {
            origin,
            span,
            ordinal: 0,
            children,
            payload: None,
        }
    }

    pub(crate) fn leaf(origin: SymbolHandle, span: Span) -> Token {
        Token::new(origin, span, Vec::new())
    }

    pub(crate) fn with_ordinal(mut self, ordinal: u32) -> Token {
        self.ordinal = ordinal;
        self
    }

    /// Re-attributes the token to another rule, keeping its substance.
    /// Used when a named indirection matched through its referent and when
    /// a zero-or-more match reuses its inner repetition's token.
    pub(crate) fn reoriginate(mut self, origin: SymbolHandle) -> Token {
        self.origin = origin;
        self
    }

    pub(crate) fn set_payload(&mut self, payload: Box<dyn Any>) {
        self.payload = Some(payload);
    }

    pub(crate) fn payload_mut(&mut self) -> &mut Option<Box<dyn Any>> {
        &mut self.payload
    }

    pub fn origin(&self) -> SymbolHandle {
        self.origin
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    pub fn children(&self) -> &[Token] {
        &self.children
    }

    pub(crate) fn children_mut(&mut self) -> &mut Vec<Token> {
        &mut self.children
    }

    /// True when the token matched without consuming input.
    pub fn is_empty(&self) -> bool {
        self.span.is_empty()
    }

    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        self.span.as_str(source)
    }

    /// Indented one-line-per-token rendering of the subtree.
    pub fn display_into(
        &self,
        rules: &RuleMap,
        source: &str,
        buf: &mut dyn std::fmt::Write,
    ) -> std::fmt::Result {
        self.display_indented(rules, source, buf, 0)
    }

    fn display_indented(
        &self,
        rules: &RuleMap,
        source: &str,
        buf: &mut dyn std::fmt::Write,
        depth: usize,
    ) -> std::fmt::Result {
        for _ in 0..depth {
            buf.write_str("  ")?;
        }
        let id = &rules.symbol(self.origin).id;
        if self.children.is_empty() {
            writeln!(buf, "{id} {} {:?}", self.span, self.text(source))?;
        } else {
            writeln!(buf, "{id} {}", self.span)?;
        }
        for child in &self.children {
            child.display_indented(rules, source, buf, depth + 1)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("origin", &self.origin)
            .field("span", &self.span)
            .field("ordinal", &self.ordinal)
            .field("children", &self.children.len())
            .finish()
    }
}

/// A listener's window onto one token during the post-order walk.
///
/// Children have already been visited, so their payloads are ready to be
/// taken. The accessors assert the structural family the listener was
/// registered for, then expose the matching view.
pub struct TokenView<'a> {
    token: &'a mut Token,
    rules: &'a RuleMap,
    source: &'a str,
}

impl<'a> TokenView<'a> {
    pub(crate) fn new(token: &'a mut Token, rules: &'a RuleMap, source: &'a str) -> TokenView<'a> {
        TokenView {
            token,
            rules,
            source,
        }
    }

    pub fn id(&self) -> &str {
        &self.rules.symbol(self.token.origin).id
    }

    pub fn span(&self) -> Span {
        self.token.span()
    }

    pub fn text(&self) -> &'a str {
        self.token.span().as_str(self.source)
    }

    pub fn family(&self) -> SymbolFamily {
        self.rules.family(self.token.origin())
    }

    pub fn ordinal(&self) -> u32 {
        self.token.ordinal()
    }

    pub fn child_count(&self) -> usize {
        self.token.children().len()
    }

    pub fn child_text(&self, index: usize) -> Result<&'a str, GrammarError> {
        let child = self.token.children().get(index).ok_or_else(|| {
            GrammarError::token_mismatch(self.id(), format!("it has no child {index}"))
        })?;
        Ok(child.span().as_str(self.source))
    }

    /// Moves the payload out of the child at `index`, downcasting it.
    /// An absent or differently-typed payload is a [`TokenMismatch`];
    /// listeners of the child rule establish what is stored there.
    ///
    /// [`TokenMismatch`]: GrammarError::TokenMismatch
    pub fn take_payload<T: 'static>(&mut self, index: usize) -> Result<T, GrammarError> {
        let rule = self.rules.symbol(self.token.origin()).id.clone();
        let child = self
            .token
            .children_mut()
            .get_mut(index)
            .ok_or_else(|| GrammarError::token_mismatch(&rule, format!("it has no child {index}")))?;
        let boxed = child.payload_mut().take().ok_or_else(|| {
            GrammarError::token_mismatch(&rule, format!("child {index} carries no payload"))
        })?;
        boxed.downcast::<T>().map(|value| *value).map_err(|_| {
            GrammarError::token_mismatch(&rule, format!("child {index} payload has another type"))
        })
    }

    /// A view of the child at `index`, for digging into nested structure
    /// such as the items of an inner repetition.
    pub fn child(&mut self, index: usize) -> Result<TokenView<'_>, GrammarError> {
        let rule = self.rules.symbol(self.token.origin()).id.clone();
        let rules = self.rules;
        let source = self.source;
        let token = self
            .token
            .children_mut()
            .get_mut(index)
            .ok_or_else(|| GrammarError::token_mismatch(&rule, format!("it has no child {index}")))?;
        Ok(TokenView {
            token,
            rules,
            source,
        })
    }

    pub fn has_payload(&self, index: usize) -> bool {
        self.token
            .children()
            .get(index)
            .is_some_and(|child| child.payload.is_some())
    }

    /// Aborts the walk with a parse failure pinned to this token.
    pub fn raise<T>(&self, message: impl ToString) -> Result<T, GrammarError> {
        Err(GrammarError::ParseFailure {
            message: message.to_string(),
            offset: self.token.span().start() as usize,
        })
    }

    /// For option and zero-or-more rules: whether anything matched. An
    /// absent optional leaves a childless empty token.
    pub fn is_present(&self) -> bool {
        !self.token.children().is_empty() || !self.token.is_empty()
    }

    pub(crate) fn token_mut(&mut self) -> &mut Token {
        self.token
    }
}

use std::collections::HashSet;

use crate::span::Span;
use crate::stream::CharCursor;
use crate::symbol::{RuleMap, SymbolHandle, SymbolKind};
use crate::token::Token;
use crate::trace::MatchTrace;

/// Matches symbols against a character cursor, producing [`Token`] trees.
///
/// Matching is a recursive descent with ordered choice and full
/// backtracking. Two tables keep it bounded:
///
/// * a recursion guard keyed by (symbol, position). A non-junction symbol
///   re-entered at the same position fails instead of looping, while
///   re-entry at an advanced position still works for nested structures.
///   Junction symbols are exempt from the head check so alternatives can
///   nest at one position; instead a junction skips any member that is
///   already on the stack at the current position, which is what cuts
///   cycles that run through junctions;
/// * a failure cache keyed by (symbol, position), so backtracking does not
///   re-run attempts already known to fail. A failure observed while the
///   guard pruned an enclosing attempt is not cached, because it depends
///   on the stack above it.
pub struct Matcher<'a> {
    rules: &'a RuleMap,
    skip: SymbolHandle,
    cursor: CharCursor<'a>,
    recursions: Vec<(SymbolHandle, u32)>,
    fail_cache: HashSet<(SymbolHandle, u32)>,
    /// Lowest recursion-stack index whose guard entry pruned a descendant
    /// of the attempt in progress; `usize::MAX` when none did.
    blocked_below: usize,
    /// Highest position any attempt failed at, for error reporting.
    furthest: u32,
    trace: Option<&'a mut dyn MatchTrace>,
}

impl<'a> Matcher<'a> {
    pub fn new(rules: &'a RuleMap, skip: SymbolHandle, source: &'a str) -> Matcher<'a> {
        Matcher {
            rules,
            skip,
            cursor: CharCursor::new(source),
            recursions: Vec::new(),
            fail_cache: HashSet::new(),
            blocked_below: usize::MAX,
            furthest: 0,
            trace: None,
        }
    }

    pub fn with_trace(
        rules: &'a RuleMap,
        skip: SymbolHandle,
        source: &'a str,
        trace: &'a mut dyn MatchTrace,
    ) -> Matcher<'a> {
        let mut matcher = Matcher::new(rules, skip, source);
        matcher.trace = Some(trace);
        matcher
    }

    pub fn position(&self) -> u32 {
        self.cursor.position()
    }

    pub fn at_end(&self) -> bool {
        self.cursor.at_end()
    }

    /// The highest position at which any attempt failed so far. This is
    /// where a failed parse most likely went wrong.
    pub fn furthest_failure(&self) -> u32 {
        self.furthest
    }

    /// Matches the skip rule once, discarding its token. While the skip
    /// rule itself is being matched, the inner skip is the zero-length
    /// sentinel, so skip content cannot recurse into skipping.
    pub fn consume_skip(&mut self) {
        let empty = self.rules.empty_handle();
        if self.skip == empty {
            return;
        }
        let skip = std::mem::replace(&mut self.skip, empty);
        let _ = self.match_symbol(skip);
        self.skip = skip;
    }

    /// Attempts `handle` at the current position. On failure the cursor is
    /// left where it was.
    pub fn match_symbol(&mut self, handle: SymbolHandle) -> Option<Token> {
        let position = self.cursor.position();
        let key = (handle, position);
        let id = &self.rules.symbol(handle).id;

        if let Some(trace) = self.trace.as_deref_mut() {
            trace.enter(id, position);
        }
        if self.fail_cache.contains(&key) {
            self.trace_exit(handle, position, false);
            return None;
        }
        if !self.is_junction(handle) {
            if let Some(index) = self.recursions.iter().position(|&entry| entry == key) {
                self.blocked_below = self.blocked_below.min(index);
                self.trace_exit(handle, position, false);
                return None;
            }
        }

        let depth = self.recursions.len();
        let outer_blocked = std::mem::replace(&mut self.blocked_below, usize::MAX);
        self.recursions.push(key);
        let result = if self.rules.symbol(handle).verbatim {
            self.attempt_verbatim(handle, position)
        } else {
            self.attempt(handle, position)
        };
        self.recursions.pop();
        let blocked = self.blocked_below;

        // cache the failure only if nothing above this frame pruned a
        // descendant; such failures replay identically on a fresh attempt
        if result.is_none() {
            self.furthest = self.furthest.max(self.cursor.position());
            if blocked >= depth {
                self.fail_cache.insert(key);
            }
        }
        self.blocked_below = outer_blocked.min(blocked);

        self.trace_exit(handle, position, result.is_some());
        result
    }

    fn is_junction(&self, handle: SymbolHandle) -> bool {
        matches!(
            self.rules.symbol(self.rules.resolve(handle)).kind,
            SymbolKind::Junction(_)
        )
    }

    fn trace_exit(&mut self, handle: SymbolHandle, position: u32, matched: bool) {
        if let Some(trace) = self.trace.as_deref_mut() {
            let id = &self.rules.symbol(handle).id;
            trace.exit(id, position, matched);
        }
    }

    /// A verbatim symbol matches with the skip rule suppressed, so its
    /// interior stays exact. After a non-empty match one trailing skip is
    /// consumed, which is what a sequence would have done and what keeps
    /// adjacent verbatim matches separable inside repetitions.
    fn attempt_verbatim(&mut self, handle: SymbolHandle, position: u32) -> Option<Token> {
        let empty = self.rules.empty_handle();
        let saved = std::mem::replace(&mut self.skip, empty);
        let result = self.attempt(handle, position);
        self.skip = saved;
        if let Some(token) = &result {
            if !token.is_empty() {
                self.consume_skip();
            }
        }
        result
    }

    fn attempt(&mut self, handle: SymbolHandle, position: u32) -> Option<Token> {
        match &self.rules.symbol(handle).kind {
            SymbolKind::Sequence(members) => {
                let members = members.clone();
                self.match_sequence(handle, position, &members)
            }
            SymbolKind::Junction(members) => {
                let members = members.clone();
                self.match_junction(handle, position, &members)
            }
            SymbolKind::Repetition(inner) => {
                let inner = *inner;
                self.match_repetition(handle, position, inner)
            }
            SymbolKind::Option(inner) => {
                let inner = *inner;
                let token = match self.match_symbol(inner) {
                    Some(matched) => Token::new(handle, matched.span(), vec![matched]),
                    None => Token::leaf(handle, Span::at(position)),
                };
                Some(token)
            }
            SymbolKind::RepeatOption { option } => {
                let option = *option;
                let mut token = self.match_symbol(option)?;
                match token.children_mut().pop() {
                    // adopt the repetition's children as our own
                    Some(repetition) => Some(repetition.reoriginate(handle)),
                    None => Some(Token::leaf(handle, token.span())),
                }
            }
            SymbolKind::Character(c) => {
                let c = *c;
                if self.cursor.peek() == Some(c) {
                    self.cursor.bump(c);
                    Some(Token::leaf(
                        handle,
                        Span::new(position, self.cursor.position()),
                    ))
                } else {
                    None
                }
            }
            SymbolKind::Text(text) => {
                let text = text.clone();
                if self.cursor.src()[position as usize..].starts_with(&*text) {
                    self.cursor.advance(text.chars().count());
                    Some(Token::leaf(
                        handle,
                        Span::new(position, self.cursor.position()),
                    ))
                } else {
                    None
                }
            }
            SymbolKind::Switch(ranges) => {
                let c = self.cursor.peek()?;
                let ordinal = ranges.accept(c)?;
                self.cursor.bump(c);
                let span = Span::new(position, self.cursor.position());
                Some(Token::leaf(handle, span).with_ordinal(ordinal))
            }
            SymbolKind::CatchAll => {
                let c = self.cursor.peek()?;
                self.cursor.bump(c);
                let span = Span::new(position, self.cursor.position());
                Some(Token::leaf(handle, span).with_ordinal(1))
            }
            SymbolKind::ZeroLength => Some(Token::leaf(handle, Span::at(position))),
            SymbolKind::Implicit(reference) => {
                // keeps the matched substance but re-attributes it to the
                // named rule, so listeners bound to the id see it
                let reference = (*reference)?;
                let matched = self.match_symbol(reference)?;
                Some(matched.reoriginate(handle))
            }
        }
    }

    /// Skip content is consumed after every member that matched something,
    /// the last one included. That trailing consumption is what separates
    /// adjacent matches inside an enclosing repetition. The token's span
    /// still ends at the last member, so skipped text never leaks into it.
    fn match_sequence(
        &mut self,
        handle: SymbolHandle,
        position: u32,
        members: &[SymbolHandle],
    ) -> Option<Token> {
        self.cursor.save();
        let mut children = Vec::with_capacity(members.len());
        for &member in members {
            match self.match_symbol(member) {
                Some(token) => {
                    let progressed = !token.is_empty();
                    children.push(token);
                    if progressed {
                        self.consume_skip();
                    }
                }
                None => {
                    self.cursor.revert();
                    return None;
                }
            }
        }
        self.cursor.discard_mark();
        let end = children.last().map_or(position, |last| last.span().end());
        Some(Token::new(handle, Span::new(position, end), children))
    }

    fn match_junction(
        &mut self,
        handle: SymbolHandle,
        position: u32,
        members: &[SymbolHandle],
    ) -> Option<Token> {
        for (i, &member) in members.iter().enumerate() {
            // a member already being attempted here would recurse forever
            if let Some(index) = self
                .recursions
                .iter()
                .position(|&entry| entry == (member, position))
            {
                self.blocked_below = self.blocked_below.min(index);
                continue;
            }
            if let Some(token) = self.match_symbol(member) {
                let wrapped = Token::new(handle, token.span(), vec![token]);
                return Some(wrapped.with_ordinal(i as u32));
            }
        }
        None
    }

    /// Items are matched strictly back to back; skip content does not
    /// separate them, so lexical rules built on repetitions stay
    /// contiguous. Sequences inside the items eat their own trailing skip.
    fn match_repetition(
        &mut self,
        handle: SymbolHandle,
        position: u32,
        inner: SymbolHandle,
    ) -> Option<Token> {
        let mut children: Vec<Token> = Vec::new();
        loop {
            match self.match_symbol(inner) {
                Some(token) => {
                    let progressed = !token.is_empty();
                    children.push(token);
                    // a zero-length item would repeat forever
                    if !progressed {
                        break;
                    }
                }
                None => break,
            }
        }
        if children.is_empty() {
            return None;
        }
        let end = children.last().map_or(position, |last| last.span().end());
        Some(Token::new(handle, Span::new(position, end), children))
    }
}

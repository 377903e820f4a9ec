use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::Path;

use crate::error::GrammarError;
use crate::matcher::Matcher;
use crate::meta;
use crate::stream::Source;
use crate::symbol::{IdStr, RuleMap, RuleMapBuilder, SymbolFamily, SymbolHandle};
use crate::token::{Token, TokenView};
use crate::trace::MatchTrace;
use crate::walker::{self, Listener, MutableState};

/// A compiled grammar: frozen rules, a start rule, a skip rule, and the
/// listeners that reduce token trees to `R` values.
///
/// `M` is caller state threaded through every listener during the walk.
/// A built grammar is immutable and can be shared across threads.
pub struct Grammar<R, M> {
    rules: RuleMap,
    start: SymbolHandle,
    skip: SymbolHandle,
    listeners: HashMap<IdStr, Listener<M>>,
    _result: PhantomData<fn() -> R>,
}

impl<R, M> std::fmt::Debug for Grammar<R, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Grammar")
            .field("rules", &self.rules)
            .field("start", &self.start)
            .field("skip", &self.skip)
            .finish_non_exhaustive()
    }
}

/// Compiles `definition` and runs `configure` on the resulting builder.
///
/// ```no_run
/// # use gramat::{grammar, GrammarError};
/// let sum = grammar::<u32, ()>(
///     "
///     number: [0-9]+;
///     sum: number \"+\" number;
///     skip: [\\u0000-\\u0020]+;
///     ",
///     |g| {
///         g.start("sum")?;
///         g.skip("skip")?;
///         g.on_repetition("number", |view, _| Ok(view.text().parse::<u32>().unwrap()))?;
///         g.on_sequence("sum", |view, _| {
///             Ok(view.take_payload::<u32>(0)? + view.take_payload::<u32>(2)?)
///         })
///     },
/// )?;
/// # Ok::<(), GrammarError>(())
/// ```
pub fn grammar<R: 'static, M: MutableState>(
    definition: &str,
    configure: impl FnOnce(&mut GrammarBuilder<R, M>) -> Result<(), GrammarError>,
) -> Result<Grammar<R, M>, GrammarError> {
    let rules = meta::parse_definition(definition)?;
    let mut builder = GrammarBuilder {
        rules,
        start: None,
        skip: None,
        listeners: HashMap::new(),
        _result: PhantomData,
    };
    configure(&mut builder)?;
    builder.build()
}

enum SkipChoice {
    Rule(SymbolHandle),
    None,
}

/// Attaches start and skip rules, listeners, and imports to a parsed
/// definition. Handles stay valid across the freeze, so everything is
/// recorded against the builder's arena directly.
pub struct GrammarBuilder<R, M> {
    rules: RuleMapBuilder,
    start: Option<SymbolHandle>,
    skip: Option<SkipChoice>,
    listeners: HashMap<IdStr, Listener<M>>,
    _result: PhantomData<fn() -> R>,
}

impl<R: 'static, M: MutableState> GrammarBuilder<R, M> {
    /// For grammars whose rules are assembled by hand rather than parsed
    /// from a definition. The bootstrap grammar is built this way.
    pub(crate) fn from_rules(rules: RuleMapBuilder) -> GrammarBuilder<R, M> {
        GrammarBuilder {
            rules,
            start: None,
            skip: None,
            listeners: HashMap::new(),
            _result: PhantomData,
        }
    }

    fn require(&self, id: &str) -> Result<SymbolHandle, GrammarError> {
        self.rules
            .lookup(id)
            .ok_or_else(|| GrammarError::MissingRule(id.to_owned()))
    }

    /// Declares the rule that must match the entire input.
    pub fn start(&mut self, id: &str) -> Result<(), GrammarError> {
        let handle = self.require(id)?;
        if self.start.replace(handle).is_some() {
            return Err(GrammarError::Reassignment("the start rule".to_owned()));
        }
        Ok(())
    }

    /// Declares the rule matched and discarded between tokens.
    pub fn skip(&mut self, id: &str) -> Result<(), GrammarError> {
        let handle = self.require(id)?;
        if self.skip.replace(SkipChoice::Rule(handle)).is_some() {
            return Err(GrammarError::Reassignment("the skip rule".to_owned()));
        }
        Ok(())
    }

    /// Declares that nothing is ever skipped.
    pub fn no_skip(&mut self) -> Result<(), GrammarError> {
        if self.skip.replace(SkipChoice::None).is_some() {
            return Err(GrammarError::Reassignment("the skip rule".to_owned()));
        }
        Ok(())
    }

    /// Copies a rule, with everything it references, out of another
    /// grammar. The copied rule keeps its id here.
    pub fn import<R2, M2>(
        &mut self,
        id: &str,
        other: &Grammar<R2, M2>,
    ) -> Result<(), GrammarError> {
        self.rules.import_from(id, &other.rules)
    }

    /// Attaches a listener without asserting the rule's structure.
    pub fn on<T: Any>(
        &mut self,
        id: &str,
        listener: impl Fn(&mut TokenView<'_>, &mut M) -> Result<T, GrammarError>
            + Send
            + Sync
            + 'static,
    ) -> Result<(), GrammarError> {
        self.require(id)?;
        let id: IdStr = id.into();
        if self.listeners.contains_key(&id) {
            return Err(GrammarError::Reassignment(format!("listener for '{id}'")));
        }
        let boxed: Listener<M> = Box::new(move |view, state| {
            listener(view, state).map(|value| Box::new(value) as Box<dyn Any>)
        });
        self.listeners.insert(id, boxed);
        Ok(())
    }

    fn on_family<T: Any>(
        &mut self,
        id: &str,
        expected: SymbolFamily,
        listener: impl Fn(&mut TokenView<'_>, &mut M) -> Result<T, GrammarError>
            + Send
            + Sync
            + 'static,
    ) -> Result<(), GrammarError> {
        let handle = self.require(id)?;
        let actual = self.rules.family(handle);
        if actual != expected {
            return Err(GrammarError::RuleMismatch {
                rule: id.to_owned(),
                expected: expected.name(),
                actual: actual.name(),
            });
        }
        self.on(id, listener)
    }

    pub fn on_sequence<T: Any>(
        &mut self,
        id: &str,
        listener: impl Fn(&mut TokenView<'_>, &mut M) -> Result<T, GrammarError>
            + Send
            + Sync
            + 'static,
    ) -> Result<(), GrammarError> {
        self.on_family(id, SymbolFamily::Sequence, listener)
    }

    pub fn on_junction<T: Any>(
        &mut self,
        id: &str,
        listener: impl Fn(&mut TokenView<'_>, &mut M) -> Result<T, GrammarError>
            + Send
            + Sync
            + 'static,
    ) -> Result<(), GrammarError> {
        self.on_family(id, SymbolFamily::Junction, listener)
    }

    pub fn on_repetition<T: Any>(
        &mut self,
        id: &str,
        listener: impl Fn(&mut TokenView<'_>, &mut M) -> Result<T, GrammarError>
            + Send
            + Sync
            + 'static,
    ) -> Result<(), GrammarError> {
        self.on_family(id, SymbolFamily::Repetition, listener)
    }

    pub fn on_option<T: Any>(
        &mut self,
        id: &str,
        listener: impl Fn(&mut TokenView<'_>, &mut M) -> Result<T, GrammarError>
            + Send
            + Sync
            + 'static,
    ) -> Result<(), GrammarError> {
        self.on_family(id, SymbolFamily::Option, listener)
    }

    pub fn on_star<T: Any>(
        &mut self,
        id: &str,
        listener: impl Fn(&mut TokenView<'_>, &mut M) -> Result<T, GrammarError>
            + Send
            + Sync
            + 'static,
    ) -> Result<(), GrammarError> {
        self.on_family(id, SymbolFamily::Star, listener)
    }

    pub fn on_character<T: Any>(
        &mut self,
        id: &str,
        listener: impl Fn(&mut TokenView<'_>, &mut M) -> Result<T, GrammarError>
            + Send
            + Sync
            + 'static,
    ) -> Result<(), GrammarError> {
        self.on_family(id, SymbolFamily::Character, listener)
    }

    pub fn on_text<T: Any>(
        &mut self,
        id: &str,
        listener: impl Fn(&mut TokenView<'_>, &mut M) -> Result<T, GrammarError>
            + Send
            + Sync
            + 'static,
    ) -> Result<(), GrammarError> {
        self.on_family(id, SymbolFamily::Text, listener)
    }

    pub fn on_switch<T: Any>(
        &mut self,
        id: &str,
        listener: impl Fn(&mut TokenView<'_>, &mut M) -> Result<T, GrammarError>
            + Send
            + Sync
            + 'static,
    ) -> Result<(), GrammarError> {
        self.on_family(id, SymbolFamily::Switch, listener)
    }

    pub(crate) fn build(self) -> Result<Grammar<R, M>, GrammarError> {
        let start = self
            .start
            .ok_or_else(|| GrammarError::MissingRule("a start rule was never assigned".to_owned()))?;
        if self.skip.is_none() {
            return Err(GrammarError::MissingRule(
                "a skip rule was never assigned, call skip() or no_skip()".to_owned(),
            ));
        }
        let rules = self.rules.build()?;
        let skip = match self.skip {
            Some(SkipChoice::Rule(handle)) => handle,
            _ => rules.empty_handle(),
        };
        Ok(Grammar {
            rules,
            start,
            skip,
            listeners: self.listeners,
            _result: PhantomData,
        })
    }
}

impl<R: 'static, M: MutableState> Grammar<R, M> {
    pub fn rules(&self) -> &RuleMap {
        &self.rules
    }

    /// Matches the start rule against the whole input without running any
    /// listeners.
    pub fn tokenize(&self, source: &str) -> Result<Token, GrammarError> {
        let mut matcher = Matcher::new(&self.rules, self.skip, source);
        self.match_root(&mut matcher)
    }

    pub fn tokenize_with_trace(
        &self,
        source: &str,
        trace: &mut dyn MatchTrace,
    ) -> Result<Token, GrammarError> {
        let mut matcher = Matcher::with_trace(&self.rules, self.skip, source, trace);
        self.match_root(&mut matcher)
    }

    /// Parses the whole input and reduces it to an `R` through the
    /// registered listeners.
    pub fn parse(&self, source: &str, state: &mut M) -> Result<R, GrammarError> {
        let root = self.tokenize(source)?;
        self.reduce(root, source, state)
    }

    /// Like [`Grammar::parse`], but a failure to match yields `Ok(None)`
    /// instead of an error. Configuration and listener errors still fail.
    pub fn try_parse(&self, source: &str, state: &mut M) -> Result<Option<R>, GrammarError> {
        match self.parse(source, state) {
            Ok(value) => Ok(Some(value)),
            Err(GrammarError::ParseFailure { .. }) => Ok(None),
            Err(other) => Err(other),
        }
    }

    pub fn parse_file(&self, path: impl AsRef<Path>, state: &mut M) -> Result<R, GrammarError> {
        let source = Source::from_path(path)?;
        self.parse(source.as_str(), state)
    }

    pub fn try_parse_file(
        &self,
        path: impl AsRef<Path>,
        state: &mut M,
    ) -> Result<Option<R>, GrammarError> {
        let source = Source::from_path(path)?;
        self.try_parse(source.as_str(), state)
    }

    pub fn parse_with_trace(
        &self,
        source: &str,
        state: &mut M,
        trace: &mut dyn MatchTrace,
    ) -> Result<R, GrammarError> {
        let root = self.tokenize_with_trace(source, trace)?;
        self.reduce(root, source, state)
    }

    fn match_root(&self, matcher: &mut Matcher<'_>) -> Result<Token, GrammarError> {
        let start_id = self.rules.symbol(self.start).id.clone();
        matcher.consume_skip();
        let root = match matcher.match_symbol(self.start) {
            Some(root) => root,
            None => {
                return Err(GrammarError::ParseFailure {
                    message: format!("rule '{start_id}' did not match"),
                    offset: matcher.furthest_failure() as usize,
                })
            }
        };
        matcher.consume_skip();
        if !matcher.at_end() {
            return Err(GrammarError::ParseFailure {
                message: "input not fully consumed".to_owned(),
                offset: matcher.position() as usize,
            });
        }
        Ok(root)
    }

    fn reduce(&self, mut root: Token, source: &str, state: &mut M) -> Result<R, GrammarError> {
        walker::walk(&mut root, &self.rules, source, &self.listeners, state)?;
        let start_id = &self.rules.symbol(self.start).id;
        let payload = root.payload_mut().take().ok_or_else(|| {
            GrammarError::token_mismatch(start_id, "the start rule produced no value")
        })?;
        let value = payload.downcast::<R>().map_err(|_| {
            GrammarError::token_mismatch(start_id, "the start rule produced a value of another type")
        })?;
        Ok(*value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn words() -> Grammar<Vec<String>, ()> {
        grammar(
            "
            word: [a-z]+;
            line: word word*;
            skip: [\\u0000-\\u0020]+;
            ",
            |g| {
                g.start("line")?;
                g.skip("skip")?;
                g.on_repetition("word", |view, _| Ok(view.text().to_owned()))?;
                g.on_sequence("line", |view, _| {
                    let mut words = vec![view.take_payload::<String>(0)?];
                    // the star child holds the remaining words
                    let mut rest = view.child(1)?;
                    for i in 0..rest.child_count() {
                        words.push(rest.take_payload::<String>(i)?);
                    }
                    Ok(words)
                })
            },
        )
        .unwrap()
    }

    #[test]
    fn parses_and_reduces() {
        let g = words();
        let parsed = g.parse("a b", &mut ()).unwrap();
        assert_eq!(parsed, vec!["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn mismatch_reports_furthest_failure_offset() {
        let g = grammar::<(), ()>(
            "
            pair: \"a\" \"b\";
            skip: [\\u0000-\\u0020]+;
            ",
            |g| {
                g.start("pair")?;
                g.skip("skip")?;
                g.on_sequence("pair", |_, _| Ok(()))
            },
        )
        .unwrap();
        let err = g.parse("a c", &mut ()).unwrap_err();
        match err {
            GrammarError::ParseFailure { offset, .. } => assert_eq!(offset, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn try_parse_turns_failure_into_none() {
        let g = words();
        assert!(g.try_parse("a 1", &mut ()).unwrap().is_none());
        assert!(g.try_parse("ok", &mut ()).unwrap().is_some());
    }

    #[test]
    fn unconsumed_input_is_a_failure() {
        let g = words();
        let err = g.parse("ab !", &mut ()).unwrap_err();
        match err {
            GrammarError::ParseFailure { message, offset } => {
                assert_eq!(message, "input not fully consumed");
                assert_eq!(offset, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn start_must_be_declared() {
        let err = grammar::<(), ()>("word: [a-z]+;", |g| g.no_skip()).unwrap_err();
        assert!(matches!(err, GrammarError::MissingRule(_)));
    }

    #[test]
    fn listener_family_is_checked_at_registration() {
        let err = grammar::<(), ()>("word: [a-z]+;", |g| {
            g.start("word")?;
            g.no_skip()?;
            g.on_sequence("word", |_, _| Ok(()))
        })
        .unwrap_err();
        match err {
            GrammarError::RuleMismatch { rule, .. } => assert_eq!(rule, "word"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_child_payload_is_a_token_mismatch() {
        // the "a" child has no listener, so it carries nothing to take
        let g = grammar::<u32, ()>("pair: \"a\" \"b\";", |g| {
            g.start("pair")?;
            g.no_skip()?;
            g.on_sequence("pair", |view, _| view.take_payload::<u32>(0))
        })
        .unwrap();
        let err = g.parse("ab", &mut ()).unwrap_err();
        assert!(matches!(err, GrammarError::TokenMismatch { .. }));
    }

    #[test]
    fn out_of_bounds_child_is_a_token_mismatch() {
        let g = grammar::<String, ()>("pair: \"a\" \"b\";", |g| {
            g.start("pair")?;
            g.no_skip()?;
            g.on_sequence("pair", |view, _| Ok(view.child_text(7)?.to_owned()))
        })
        .unwrap();
        let err = g.parse("ab", &mut ()).unwrap_err();
        match err {
            GrammarError::TokenMismatch { rule, .. } => assert_eq!(rule, "pair"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn import_carries_a_rule_across_grammars() {
        let lexical = grammar::<String, ()>("number: [0-9]+;", |g| {
            g.start("number")?;
            g.no_skip()?;
            g.on_repetition("number", |view, _| Ok(view.text().to_owned()))
        })
        .unwrap();

        let g = grammar::<String, ()>(
            "
            call: name \"(\" number \")\";
            name: [a-z]+;
            ",
            |g| {
                g.import("number", &lexical)?;
                g.start("call")?;
                g.no_skip()?;
                g.on_sequence("call", |view, _| Ok(view.child_text(2)?.to_owned()))
            },
        )
        .unwrap();

        assert_eq!(g.parse("sqrt(81)", &mut ()).unwrap(), "81");
    }
}

//! A recursive-descent matching engine for grammars written in a small
//! textual rule language. A [`Grammar`] pairs a compiled [`RuleMap`] with
//! per-rule listeners that fold the matched token tree into a value.
//!
//! The usual entry point is [`grammar()`], which parses a definition and
//! hands a [`GrammarBuilder`] to a configuration closure. [`meta::compile`]
//! is the lower-level door for tooling that only needs the rule map.

pub mod error;
pub mod grammar;
pub mod matcher;
pub mod meta;
pub mod span;
pub mod stream;
pub mod symbol;
pub mod token;
pub mod trace;
pub mod walker;

pub use error::GrammarError;
pub use grammar::{grammar, Grammar, GrammarBuilder};
pub use matcher::Matcher;
pub use meta::compile;
pub use span::Span;
pub use stream::{CharCursor, Source};
pub use symbol::{RangeSet, RuleMap, RuleMapBuilder, SymbolFamily, SymbolHandle};
pub use token::{Token, TokenView};
pub use trace::{LogTrace, MatchTrace};
pub use walker::MutableState;

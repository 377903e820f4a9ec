//! The bootstrap grammar: parses textual rule definitions into a
//! [`RuleMapBuilder`]. Its own rules are assembled by hand, its reducers
//! are ordinary listeners that drive a builder carried in the walk state.

use std::sync::OnceLock;

use crate::error::GrammarError;
use crate::grammar::{Grammar, GrammarBuilder};
use crate::symbol::{RangeSet, RuleMap, RuleMapBuilder, SymbolHandle};
use crate::walker::MutableState;

/// Walk state of a definition parse: the rule map being assembled.
struct MetaState {
    builder: RuleMapBuilder,
    position: u32,
}

impl MutableState for MetaState {
    fn set_position(&mut self, position: u32) {
        self.position = position;
    }
}

/// Parses a definition into a builder that may still hold unresolved
/// forward references, to be satisfied by imports before freezing.
pub(crate) fn parse_definition(definition: &str) -> Result<RuleMapBuilder, GrammarError> {
    let mut state = MetaState {
        builder: RuleMapBuilder::new(),
        position: 0,
    };
    bootstrap().parse(definition, &mut state)?;
    Ok(state.builder)
}

/// Compiles a definition into a frozen rule map. Fails if the definition
/// references rules it never defines.
pub fn compile(definition: &str) -> Result<RuleMap, GrammarError> {
    parse_definition(definition)?.build()
}

fn bootstrap() -> &'static Grammar<(), MetaState> {
    static BOOTSTRAP: OnceLock<Grammar<(), MetaState>> = OnceLock::new();
    BOOTSTRAP.get_or_init(|| build_bootstrap().expect("the bootstrap grammar is well formed"))
}

/// Ordinals of the `term` choice, shared between its rule set and the
/// reducers below.
mod term {
    pub const PAREN: u32 = 0;
    pub const ID: u32 = 1;
    pub const SWITCH: u32 = 2;
    pub const CHARACTER: u32 = 3;
    pub const TEXT: u32 = 4;
}

/// Ordinal of the bare-operand alternative of `symbol`, and of the bare-term
/// alternative of `operand`. Together with [`term::ID`] they spot a rule
/// body that is nothing but another rule's id.
const SYMBOL_OPERAND: u32 = 2;
const OPERAND_TERM: u32 = 3;

/// Ordinals of the `class_item` choice.
mod class {
    pub const RANGE: u32 = 0;
    pub const AT_LEAST: u32 = 1;
    pub const UP_TO: u32 = 2;
    pub const SINGLE: u32 = 3;
}

fn bootstrap_rules() -> Result<RuleMapBuilder, GrammarError> {
    let mut b = RuleMapBuilder::new();

    // escape: "\" ([tnr"'-\]\\] | "u" hex hex hex hex)
    let backslash = b.character('\\');
    let escapable = b.switch_including(&['t', 'n', 'r', '"', '\'', '-', ']', '\\']);
    let mut hex_set = RangeSet::new();
    hex_set.add('0', '9');
    hex_set.add('a', 'f');
    hex_set.add('A', 'F');
    let hex = b.switch(hex_set);
    let u = b.character('u');
    let unicode = b.sequence(vec![u, hex, hex, hex, hex]);
    let escape_body = b.junction(vec![escapable, unicode]);
    let escape = b.sequence(vec![backslash, escape_body]);
    b.define("escape", escape)?;
    let escape = b.reference("escape");

    // literal character content, quotes and backslashes must be escaped
    let plain_text_char = b.switch_excluding(&['"', '\\']);
    let text_char = b.junction(vec![escape, plain_text_char]);
    b.define("text_char", text_char)?;
    let text_char = b.reference("text_char");

    // class content additionally escapes the class metacharacters
    let plain_class_char = b.switch_excluding(&[']', '\\', '-']);
    let class_char = b.junction(vec![escape, plain_class_char]);
    b.define("class_char", class_char)?;
    let class_char = b.reference("class_char");

    // class_item: c "-" c | c "-" | "-" c | c
    let dash = b.character('-');
    let range = b.sequence(vec![class_char, dash, class_char]);
    let at_least = b.sequence(vec![class_char, dash]);
    let up_to = b.sequence(vec![dash, class_char]);
    let class_item = b.junction(vec![range, at_least, up_to, class_char]);
    b.define("class_item", class_item)?;
    let class_item = b.reference("class_item");

    // switch: "[-]" | "[" "^"? class_item+ "]"
    let catch_all = b.text("[-]");
    let open_bracket = b.character('[');
    let close_bracket = b.character(']');
    let caret = b.character('^');
    let inverted = b.option(caret);
    let items = b.repetition(class_item);
    let class = b.sequence(vec![open_bracket, inverted, items, close_bracket]);
    let switch = b.junction(vec![catch_all, class]);
    let switch = b.verbatim(switch);
    b.define("switch", switch)?;

    // character: one quoted char; text: two or more. Both are matched
    // verbatim, a space or a comment opener between the quotes is content.
    let quote = b.character('"');
    let character = b.sequence(vec![quote, text_char, quote]);
    let character = b.verbatim(character);
    b.define("character", character)?;
    let more_chars = b.repetition(text_char);
    let text = b.sequence(vec![quote, text_char, more_chars, quote]);
    let text = b.verbatim(text);
    b.define("text", text)?;

    // id: a contiguous word, validated by its reducer. Wrapped in a
    // single-member sequence so it consumes the trailing skip content
    // that separates it from the next symbol.
    let mut word_set = RangeSet::new();
    word_set.add('a', 'z');
    word_set.add('A', 'Z');
    word_set.add('0', '9');
    word_set.add('_', '_');
    let word_char = b.switch(word_set);
    let word = b.repetition(word_char);
    let id = b.sequence(vec![word]);
    b.define("id", id)?;
    let id = b.reference("id");

    // The structural rules form a precedence ladder: junction binds loosest,
    // then sequence, then the postfix operators, then the atomic terms.
    // term: "(" symbol ")" | id | switch | character | text
    let symbol = b.reference("symbol");
    let switch_rule = b.reference("switch");
    let character_rule = b.reference("character");
    let text_rule = b.reference("text");
    let open_paren = b.character('(');
    let close_paren = b.character(')');
    let paren = b.sequence(vec![open_paren, symbol, close_paren]);
    let term_choice = b.junction(vec![paren, id, switch_rule, character_rule, text_rule]);
    b.define("term", term_choice)?;
    let term = b.reference("term");

    // the postfix operators only apply to a single term
    let plus = b.character('+');
    let multiple = b.sequence(vec![term, plus]);
    b.define("multiple", multiple)?;

    let question = b.character('?');
    let option = b.sequence(vec![term, question]);
    b.define("option", option)?;

    let asterisk = b.character('*');
    let star = b.sequence(vec![term, asterisk]);
    b.define("star", star)?;

    // operand: one member of a sequence, a term with an optional postfix
    let multiple_rule = b.reference("multiple");
    let option_rule = b.reference("option");
    let star_rule = b.reference("star");
    let operand_choice = b.junction(vec![multiple_rule, option_rule, star_rule, term]);
    b.define("operand", operand_choice)?;
    let operand = b.reference("operand");

    // sequence: operand operand+
    let operand_tail = b.repetition(operand);
    let sequence = b.sequence(vec![operand, operand_tail]);
    b.define("sequence", sequence)?;

    // branch: one arm of a junction, a whole sequence or a lone operand
    let sequence_rule = b.reference("sequence");
    let branch_choice = b.junction(vec![sequence_rule, operand]);
    b.define("branch", branch_choice)?;
    let branch = b.reference("branch");

    // junction: branch ("|" branch)+
    let pipe = b.character('|');
    let pipe_branch = b.sequence(vec![pipe, branch]);
    let pipe_tail = b.repetition(pipe_branch);
    let junction = b.sequence(vec![branch, pipe_tail]);
    b.define("junction", junction)?;

    // symbol: the full ladder, loosest binding first
    let junction_rule = b.reference("junction");
    let symbol_choice = b.junction(vec![junction_rule, sequence_rule, operand]);
    b.define("symbol", symbol_choice)?;

    // rule: id ":" symbol ";"
    let colon = b.character(':');
    let semicolon = b.character(';');
    let rule = b.sequence(vec![id, colon, symbol, semicolon]);
    b.define("rule", rule)?;

    let rule = b.reference("rule");
    let definition = b.repetition(rule);
    b.define("definition", definition)?;

    // skip: whitespace runs, line comments, block comments
    let whitespace = b.switch_range('\u{0}', ' ');
    let whitespace_run = b.repetition(whitespace);
    let line_open = b.text("//");
    let line_char = b.switch_excluding(&['\n']);
    let line_body = b.star(line_char);
    let line_comment = b.sequence(vec![line_open, line_body]);
    let block_open = b.text("/*");
    let not_star = b.switch_excluding(&['*']);
    let star_char = b.character('*');
    let stars = b.repetition(star_char);
    let not_star_or_slash = b.switch_excluding(&['*', '/']);
    let stars_then_other = b.sequence(vec![stars, not_star_or_slash]);
    let block_item = b.junction(vec![not_star, stars_then_other]);
    let block_body = b.star(block_item);
    let slash = b.character('/');
    let block_comment = b.sequence(vec![block_open, block_body, stars, slash]);
    let skip_item = b.junction(vec![whitespace_run, block_comment, line_comment]);
    let skip = b.repetition(skip_item);
    b.define("skip", skip)?;

    Ok(b)
}

fn build_bootstrap() -> Result<Grammar<(), MetaState>, GrammarError> {
    let rules = bootstrap_rules()?;
    let mut g: GrammarBuilder<(), MetaState> = GrammarBuilder::from_rules(rules);
    g.start("definition")?;
    g.skip("skip")?;

    g.on_sequence("escape", |view, _| {
        let text = view.text();
        let mut chars = text.chars();
        chars.next();
        match chars.next() {
            Some('t') => Ok('\t'),
            Some('n') => Ok('\n'),
            Some('r') => Ok('\r'),
            Some('u') => {
                let digits: String = chars.take(4).collect();
                u32::from_str_radix(&digits, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .map_or_else(|| view.raise(format!("invalid escape '{text}'")), Ok)
            }
            Some(c) => Ok(c),
            None => view.raise("empty escape"),
        }
    })?;

    g.on_junction("text_char", literal_char)?;
    g.on_junction("class_char", literal_char)?;

    g.on_junction("class_item", |view, _| {
        Ok(match view.ordinal() {
            class::RANGE => {
                let mut parts = view.child(0)?;
                (
                    parts.take_payload::<char>(0)?,
                    parts.take_payload::<char>(2)?,
                )
            }
            class::AT_LEAST => (view.child(0)?.take_payload::<char>(0)?, char::MAX),
            class::UP_TO => ('\u{0}', view.child(0)?.take_payload::<char>(1)?),
            class::SINGLE => {
                let c = view.take_payload::<char>(0)?;
                (c, c)
            }
            other => unreachable!("class_item ordinal {other}"),
        })
    })?;

    g.on_junction("switch", |view, state| {
        if view.ordinal() == 0 {
            return Ok(state.builder.catch_all());
        }
        let mut body = view.child(0)?;
        let inverted = body.child(1)?.is_present();
        let mut set = RangeSet::new();
        let mut items = body.child(2)?;
        for i in 0..items.child_count() {
            let (lo, hi) = items.take_payload::<(char, char)>(i)?;
            if lo > hi {
                return items.raise(format!("inverted range '{lo}-{hi}'"));
            }
            set.add(lo, hi);
        }
        if inverted {
            set.invert();
        }
        Ok(state.builder.switch(set))
    })?;

    g.on_sequence("character", |view, state| {
        let c = view.take_payload::<char>(1)?;
        Ok(state.builder.character(c))
    })?;

    g.on_sequence("text", |view, state| {
        let mut literal = String::new();
        literal.push(view.take_payload::<char>(1)?);
        let mut rest = view.child(2)?;
        for i in 0..rest.child_count() {
            literal.push(rest.take_payload::<char>(i)?);
        }
        Ok(state.builder.text(&literal))
    })?;

    g.on_sequence("id", |view, _| {
        let text = view.text();
        match text.chars().next() {
            Some(c) if c.is_ascii_digit() => view.raise(format!("invalid rule id '{text}'")),
            _ => Ok(text.to_owned()),
        }
    })?;

    g.on_junction("term", |view, state| {
        Ok(match view.ordinal() {
            term::PAREN => view.child(0)?.take_payload::<SymbolHandle>(1)?,
            term::ID => {
                let id = view.take_payload::<String>(0)?;
                state.builder.reference(&id)
            }
            term::SWITCH | term::CHARACTER | term::TEXT => {
                view.take_payload::<SymbolHandle>(0)?
            }
            other => unreachable!("term ordinal {other}"),
        })
    })?;

    g.on_sequence("multiple", |view, state| {
        let inner = view.take_payload::<SymbolHandle>(0)?;
        Ok(state.builder.repetition(inner))
    })?;

    g.on_sequence("option", |view, state| {
        let inner = view.take_payload::<SymbolHandle>(0)?;
        Ok(state.builder.option(inner))
    })?;

    g.on_sequence("star", |view, state| {
        let inner = view.take_payload::<SymbolHandle>(0)?;
        Ok(state.builder.star(inner))
    })?;

    // operand, branch and symbol only pick an alternative, the handle is
    // forwarded unchanged
    g.on_junction("operand", |view, _| view.take_payload::<SymbolHandle>(0))?;
    g.on_junction("branch", |view, _| view.take_payload::<SymbolHandle>(0))?;
    g.on_junction("symbol", |view, _| view.take_payload::<SymbolHandle>(0))?;

    g.on_sequence("sequence", |view, state| {
        let mut members = vec![view.take_payload::<SymbolHandle>(0)?];
        let mut tail = view.child(1)?;
        for i in 0..tail.child_count() {
            members.push(tail.take_payload::<SymbolHandle>(i)?);
        }
        Ok(state.builder.sequence(members))
    })?;

    g.on_sequence("junction", |view, state| {
        let mut members = vec![view.take_payload::<SymbolHandle>(0)?];
        let mut tail = view.child(1)?;
        for i in 0..tail.child_count() {
            members.push(tail.child(i)?.take_payload::<SymbolHandle>(1)?);
        }
        Ok(state.builder.junction(members))
    })?;

    g.on_sequence("rule", |view, state| {
        let id = view.take_payload::<String>(0)?;
        let delegates = {
            let mut body = view.child(2)?;
            body.ordinal() == SYMBOL_OPERAND && {
                let mut bare = body.child(0)?;
                bare.ordinal() == OPERAND_TERM && bare.child(0)?.ordinal() == term::ID
            }
        };
        if delegates {
            return view.raise(format!(
                "rule '{id}' delegates to another named rule, inline it instead"
            ));
        }
        let definition = view.take_payload::<SymbolHandle>(2)?;
        state.builder.define(&id, definition)?;
        Ok(())
    })?;

    g.on_repetition("definition", |_view, _| Ok(()))?;

    g.build()
}

fn literal_char(
    view: &mut crate::token::TokenView<'_>,
    _state: &mut MetaState,
) -> Result<char, GrammarError> {
    if view.ordinal() == 0 {
        view.take_payload::<char>(0)
    } else {
        // the switch member is a single character
        Ok(view.child_text(0)?.chars().next().unwrap_or('\u{0}'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::Matcher;
    use crate::symbol::{SymbolFamily, SymbolKind};
    use pretty_assertions::assert_eq;

    fn families(map: &RuleMap, id: &str) -> SymbolFamily {
        map.family(map.get(id).unwrap())
    }

    #[test]
    fn compiles_terminals_and_composites() {
        let map = compile(
            "
            word: [a-z]+;
            kw: \"if\";
            ch: \"x\";
            item: kw | ch | word;
            ",
        )
        .unwrap();
        assert_eq!(families(&map, "word"), SymbolFamily::Repetition);
        assert_eq!(families(&map, "kw"), SymbolFamily::Text);
        assert_eq!(families(&map, "ch"), SymbolFamily::Character);
        assert_eq!(families(&map, "item"), SymbolFamily::Junction);
    }

    #[test]
    fn sequence_needs_two_operands() {
        let map = compile("pair: \"a\" \"b\";").unwrap();
        assert_eq!(families(&map, "pair"), SymbolFamily::Sequence);
        let resolved = map.resolve(map.get("pair").unwrap());
        match &map.symbol(resolved).kind {
            SymbolKind::Sequence(members) => assert_eq!(members.len(), 2),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn postfix_operators_compile() {
        let map = compile(
            "
            many: [0-9]+;
            opt: [0-9]?;
            any: [0-9]*;
            ",
        )
        .unwrap();
        assert_eq!(families(&map, "many"), SymbolFamily::Repetition);
        assert_eq!(families(&map, "opt"), SymbolFamily::Option);
        assert_eq!(families(&map, "any"), SymbolFamily::Star);
    }

    #[test]
    fn junction_binds_looser_than_sequence() {
        // a b | c must parse as (a b) | c
        let map = compile("x: \"a\" \"b\" | \"c\";").unwrap();
        let resolved = map.resolve(map.get("x").unwrap());
        match &map.symbol(resolved).kind {
            SymbolKind::Junction(members) => {
                assert_eq!(members.len(), 2);
                assert_eq!(map.family(members[0]), SymbolFamily::Sequence);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn parentheses_group_a_choice_inside_a_sequence() {
        let map = compile("x: (\"a\" | \"b\") \"c\";").unwrap();
        let resolved = map.resolve(map.get("x").unwrap());
        match &map.symbol(resolved).kind {
            SymbolKind::Sequence(members) => {
                assert_eq!(members.len(), 2);
                assert_eq!(map.family(members[0]), SymbolFamily::Junction);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn long_sequences_stay_flat() {
        let map = compile("call: [a-z]+ \"(\" [0-9]+ \")\";").unwrap();
        let resolved = map.resolve(map.get("call").unwrap());
        match &map.symbol(resolved).kind {
            SymbolKind::Sequence(members) => assert_eq!(members.len(), 4),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn literal_interior_is_kept_verbatim() {
        let map = compile(
            "
            spaced: \"a b\";
            slashed: \"a//b\";
            ",
        )
        .unwrap();
        for (id, expected) in [("spaced", "a b"), ("slashed", "a//b")] {
            let resolved = map.resolve(map.get(id).unwrap());
            match &map.symbol(resolved).kind {
                SymbolKind::Text(text) => assert_eq!(&**text, expected),
                other => panic!("unexpected kind: {other:?}"),
            }
        }
    }

    #[test]
    fn forward_references_resolve_across_rules() {
        let map = compile(
            "
            list: item item*;
            item: [a-z]+;
            ",
        )
        .unwrap();
        assert_eq!(families(&map, "list"), SymbolFamily::Sequence);
    }

    #[test]
    fn unresolved_reference_names_the_missing_rule() {
        let err = compile("list: foo+;").unwrap_err();
        match err {
            GrammarError::MissingRule(ids) => assert_eq!(ids, "foo"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn delegation_is_rejected() {
        let err = compile(
            "
            a: [0-9];
            b: a;
            ",
        )
        .unwrap_err();
        assert!(matches!(err, GrammarError::ParseFailure { .. }));
    }

    #[test]
    fn duplicate_rule_is_rejected() {
        let err = compile(
            "
            a: [0-9];
            a: [a-z];
            ",
        )
        .unwrap_err();
        assert!(matches!(err, GrammarError::Reassignment(_)));
    }

    #[test]
    fn escapes_cover_control_and_unicode() {
        let map = compile("ws: [\\t\\n\\r\\u0020];").unwrap();
        let resolved = map.resolve(map.get("ws").unwrap());
        match &map.symbol(resolved).kind {
            SymbolKind::Switch(set) => {
                assert!(set.accept('\t').is_some());
                assert!(set.accept('\n').is_some());
                assert!(set.accept('\r').is_some());
                assert!(set.accept(' ').is_some());
                assert!(set.accept('x').is_none());
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn class_ranges_and_inversion() {
        let map = compile(
            "
            upto: [-z];
            from: [a-];
            not: [^a-z];
            any: [-];
            ",
        )
        .unwrap();
        let upto = map.resolve(map.get("upto").unwrap());
        match &map.symbol(upto).kind {
            SymbolKind::Switch(set) => {
                assert!(set.accept('\u{0}').is_some());
                assert!(set.accept('z').is_some());
            }
            other => panic!("unexpected kind: {other:?}"),
        }
        let from = map.resolve(map.get("from").unwrap());
        match &map.symbol(from).kind {
            SymbolKind::Switch(set) => {
                assert!(set.accept('a').is_some());
                assert!(set.accept(char::MAX).is_some());
                assert!(set.accept('Z').is_none());
            }
            other => panic!("unexpected kind: {other:?}"),
        }
        let not = map.resolve(map.get("not").unwrap());
        match &map.symbol(not).kind {
            SymbolKind::Switch(set) => {
                assert!(set.is_inverted());
                assert!(set.accept('q').is_none());
                assert!(set.accept('Q').is_some());
            }
            other => panic!("unexpected kind: {other:?}"),
        }
        assert_eq!(families(&map, "any"), SymbolFamily::CatchAll);
    }

    #[test]
    fn comments_and_whitespace_are_skipped() {
        let map = compile(
            "
            // a line comment
            word: [a-z]+; /* a block
            comment * with stars **/
            num: [0-9]+;
            ",
        )
        .unwrap();
        assert!(map.get("word").is_some());
        assert!(map.get("num").is_some());
    }

    #[test]
    fn ids_must_not_start_with_a_digit() {
        let err = compile("0word: [a-z];").unwrap_err();
        assert!(matches!(err, GrammarError::ParseFailure { .. }));
    }

    #[test]
    fn compiled_rules_match_input() {
        let map = compile(
            "
            expr: \"(\" expr \")\" | [0-9];
            ",
        )
        .unwrap();
        let source = "((5))";
        let mut m = Matcher::new(&map, map.empty_handle(), source);
        let token = m.match_symbol(map.get("expr").unwrap()).unwrap();
        assert_eq!(token.text(source), "((5))");
        assert!(m.at_end());
    }

    #[test]
    fn display_round_trips_through_the_compiler() {
        let map = compile("item: \"ab\" | [0-9]+;").unwrap();
        let mut out = String::new();
        map.display_into(&mut out).unwrap();
        let again = compile(&out).unwrap();
        let mut out2 = String::new();
        again.display_into(&mut out2).unwrap();
        assert_eq!(out, out2);
    }
}

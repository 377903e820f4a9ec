use std::collections::HashMap;
use std::sync::Arc;

use cranelift_entity::{entity_impl, PrimaryMap};

use crate::error::GrammarError;

/// Rule and symbol identifiers. `Arc` rather than `Rc` so a frozen rule map
/// can be read from multiple threads.
pub type IdStr = Arc<str>;

/// Ids starting with this prefix are generated for anonymous nodes and are
/// excluded from listener binding.
pub const ANON_PREFIX: char = '$';

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SymbolHandle(u32);

entity_impl! { SymbolHandle }

/// An inclusive union of code-point ranges, optionally inverted.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct RangeSet {
    lower: Vec<u32>,
    upper: Vec<u32>,
    inverted: bool,
}

impl RangeSet {
    pub fn new() -> RangeSet {
        Self::default()
    }

    pub fn including(chars: &[char]) -> RangeSet {
        let mut set = RangeSet::new();
        for &c in chars {
            set.add(c, c);
        }
        set
    }

    pub fn excluding(chars: &[char]) -> RangeSet {
        let mut set = RangeSet::including(chars);
        set.invert();
        set
    }

    pub fn add(&mut self, lo: char, hi: char) {
        debug_assert!(lo <= hi);
        self.lower.push(lo as u32);
        self.upper.push(hi as u32);
    }

    pub fn invert(&mut self) {
        self.inverted = !self.inverted;
    }

    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// Index of the first range accepting `c`, or `Some(0)` for an inverted
    /// set that excludes `c` everywhere.
    pub fn accept(&self, c: char) -> Option<u32> {
        let code = c as u32;
        let hit = (0..self.lower.len()).find(|&i| self.lower[i] <= code && code <= self.upper[i]);
        if self.inverted {
            match hit {
                Some(_) => None,
                None => Some(0),
            }
        } else {
            hit.map(|i| i as u32)
        }
    }

    pub fn pairs(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.lower.iter().copied().zip(self.upper.iter().copied())
    }
}

/// One rule node of the symbol algebra. The rule graph is frozen once its
/// owning [`RuleMap`] is built; only `Implicit` references are assigned
/// after allocation, exactly once, before the map freezes.
#[derive(Clone, Debug)]
pub enum SymbolKind {
    /// All members must match consecutively.
    Sequence(Vec<SymbolHandle>),
    /// First member that matches wins.
    Junction(Vec<SymbolHandle>),
    /// One or more matches of the inner symbol.
    Repetition(SymbolHandle),
    /// Zero or one match; never fails.
    Option(SymbolHandle),
    /// Zero or more; composed as Option(Repetition(inner)), the composed
    /// option node is stored.
    RepeatOption { option: SymbolHandle },
    Character(char),
    /// Matched atomically, all-or-nothing.
    Text(IdStr),
    Switch(RangeSet),
    /// Any single character unless input is exhausted.
    CatchAll,
    /// Always matches, consumes nothing.
    ZeroLength,
    /// Forward-reference placeholder, resolved before the first match.
    Implicit(Option<SymbolHandle>),
}

impl SymbolKind {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SymbolKind::Character(_)
                | SymbolKind::Text(_)
                | SymbolKind::Switch(_)
                | SymbolKind::CatchAll
                | SymbolKind::ZeroLength
        )
    }

    fn short_name(&self) -> &'static str {
        match self {
            SymbolKind::Sequence(_) => "Sequence",
            SymbolKind::Junction(_) => "Junction",
            SymbolKind::Repetition(_) => "Repetition",
            SymbolKind::Option(_) => "Option",
            SymbolKind::RepeatOption { .. } => "RepeatOption",
            SymbolKind::Character(_) => "Character",
            SymbolKind::Text(_) => "Text",
            SymbolKind::Switch(_) => "Switch",
            SymbolKind::CatchAll => "CatchAll",
            SymbolKind::ZeroLength => "ZeroLength",
            SymbolKind::Implicit(_) => "Implicit",
        }
    }
}

/// Structural family of a rule as seen by listeners; `Implicit` wrappers
/// are transparent.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SymbolFamily {
    Sequence,
    Junction,
    Repetition,
    Option,
    Star,
    Character,
    Text,
    Switch,
    CatchAll,
    ZeroLength,
}

impl SymbolFamily {
    pub fn name(self) -> &'static str {
        match self {
            SymbolFamily::Sequence => "a sequence",
            SymbolFamily::Junction => "an ordered choice",
            SymbolFamily::Repetition => "a one-or-more repetition",
            SymbolFamily::Option => "an option",
            SymbolFamily::Star => "a zero-or-more repetition",
            SymbolFamily::Character => "a character literal",
            SymbolFamily::Text => "a text literal",
            SymbolFamily::Switch => "a character class",
            SymbolFamily::CatchAll => "a catch-all",
            SymbolFamily::ZeroLength => "a zero-length rule",
        }
    }
}

#[derive(Clone, Debug)]
pub struct Symbol {
    pub id: IdStr,
    pub kind: SymbolKind,
    /// Matched with the skip rule suppressed throughout the subtree, then
    /// one trailing skip consumed after a non-empty match. Keeps the
    /// interior of quote-delimited constructs exact.
    pub verbatim: bool,
}

impl Symbol {
    pub fn is_anonymous(&self) -> bool {
        self.id.starts_with(ANON_PREFIX)
    }
}

/// A frozen identifier-to-symbol mapping forming one grammar's rule set.
///
/// All nodes live in one arena; rules are the named entry points. Every
/// `Implicit` is resolved, so matching never observes a dangling reference.
pub struct RuleMap {
    arena: PrimaryMap<SymbolHandle, Symbol>,
    rules: HashMap<IdStr, SymbolHandle>,
    empty: SymbolHandle,
}

impl RuleMap {
    pub fn symbol(&self, handle: SymbolHandle) -> &Symbol {
        &self.arena[handle]
    }

    /// The reserved zero-length sentinel, used for matched-empty tokens and
    /// as the inner skip while the skip rule itself is being matched.
    pub fn empty_handle(&self) -> SymbolHandle {
        self.empty
    }

    pub fn get(&self, id: &str) -> Option<SymbolHandle> {
        self.rules.get(id).copied()
    }

    pub fn require(&self, id: &str) -> Result<SymbolHandle, GrammarError> {
        self.get(id)
            .ok_or_else(|| GrammarError::MissingRule(id.to_owned()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.rules.contains_key(id)
    }

    /// Follows `Implicit` references to the symbol that actually matches.
    pub fn resolve(&self, handle: SymbolHandle) -> SymbolHandle {
        let mut current = handle;
        while let SymbolKind::Implicit(reference) = &self.arena[current].kind {
            match reference {
                Some(next) => current = *next,
                None => break,
            }
        }
        current
    }

    pub fn family(&self, handle: SymbolHandle) -> SymbolFamily {
        match &self.arena[self.resolve(handle)].kind {
            SymbolKind::Sequence(_) => SymbolFamily::Sequence,
            SymbolKind::Junction(_) => SymbolFamily::Junction,
            SymbolKind::Repetition(_) => SymbolFamily::Repetition,
            SymbolKind::Option(_) => SymbolFamily::Option,
            SymbolKind::RepeatOption { .. } => SymbolFamily::Star,
            SymbolKind::Character(_) => SymbolFamily::Character,
            SymbolKind::Text(_) => SymbolFamily::Text,
            SymbolKind::Switch(_) => SymbolFamily::Switch,
            SymbolKind::CatchAll => SymbolFamily::CatchAll,
            SymbolKind::ZeroLength => SymbolFamily::ZeroLength,
            SymbolKind::Implicit(_) => SymbolFamily::ZeroLength,
        }
    }

    /// Rule ids in sorted order, for deterministic diagnostics.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.rules.keys().map(|id| &**id).collect();
        ids.sort_unstable();
        ids
    }

    /// Renders every rule as an `id: definition;` line in definition
    /// syntax, sorted by id.
    pub fn display_into(&self, buf: &mut dyn std::fmt::Write) -> std::fmt::Result {
        for id in self.ids() {
            let handle = self.rules[id];
            write!(buf, "{id}: ")?;
            self.display_definition(handle, buf)?;
            writeln!(buf, ";")?;
        }
        Ok(())
    }

    /// Renders the structure of a node, ignoring its own name.
    fn display_definition(
        &self,
        handle: SymbolHandle,
        buf: &mut dyn std::fmt::Write,
    ) -> std::fmt::Result {
        let resolved = self.resolve(handle);
        match &self.arena[resolved].kind {
            SymbolKind::Sequence(members) => {
                for (i, &m) in members.iter().enumerate() {
                    if i > 0 {
                        buf.write_char(' ')?;
                    }
                    self.display_operand(m, buf)?;
                }
                Ok(())
            }
            SymbolKind::Junction(members) => {
                for (i, &m) in members.iter().enumerate() {
                    if i > 0 {
                        buf.write_str(" | ")?;
                    }
                    self.display_operand(m, buf)?;
                }
                Ok(())
            }
            SymbolKind::Repetition(inner) => {
                self.display_operand(*inner, buf)?;
                buf.write_char('+')
            }
            SymbolKind::Option(inner) => {
                self.display_operand(*inner, buf)?;
                buf.write_char('?')
            }
            SymbolKind::RepeatOption { option } => {
                let inner = self.star_inner(*option);
                self.display_operand(inner, buf)?;
                buf.write_char('*')
            }
            SymbolKind::Character(c) => {
                write!(buf, "\"{}\"", escape_char(*c, false))
            }
            SymbolKind::Text(text) => {
                buf.write_char('"')?;
                for c in text.chars() {
                    buf.write_str(&escape_char(c, false))?;
                }
                buf.write_char('"')
            }
            SymbolKind::Switch(ranges) => {
                buf.write_char('[')?;
                if ranges.is_inverted() {
                    buf.write_char('^')?;
                }
                for (lo, hi) in ranges.pairs() {
                    let lo = char::from_u32(lo).unwrap_or(char::REPLACEMENT_CHARACTER);
                    let hi = char::from_u32(hi).unwrap_or(char::REPLACEMENT_CHARACTER);
                    if lo == hi {
                        buf.write_str(&escape_char(lo, true))?;
                    } else {
                        write!(buf, "{}-{}", escape_char(lo, true), escape_char(hi, true))?;
                    }
                }
                buf.write_char(']')
            }
            SymbolKind::CatchAll => buf.write_str("[-]"),
            SymbolKind::ZeroLength => buf.write_str("()"),
            SymbolKind::Implicit(_) => buf.write_str("<unresolved>"),
        }
    }

    /// Renders a child position: named nodes by id, anonymous ones
    /// structurally, parenthesized where juxtaposition would be ambiguous.
    fn display_operand(
        &self,
        handle: SymbolHandle,
        buf: &mut dyn std::fmt::Write,
    ) -> std::fmt::Result {
        let symbol = &self.arena[handle];
        if !symbol.is_anonymous() {
            return buf.write_str(&symbol.id);
        }
        let parenthesize = match &self.arena[self.resolve(handle)].kind {
            SymbolKind::Sequence(members) | SymbolKind::Junction(members) => members.len() > 1,
            _ => false,
        };
        if parenthesize {
            buf.write_char('(')?;
        }
        self.display_definition(handle, buf)?;
        if parenthesize {
            buf.write_char(')')?;
        }
        Ok(())
    }

    fn star_inner(&self, option: SymbolHandle) -> SymbolHandle {
        if let SymbolKind::Option(rep) = &self.arena[option].kind {
            if let SymbolKind::Repetition(inner) = &self.arena[*rep].kind {
                return *inner;
            }
        }
        option
    }
}

impl std::fmt::Debug for RuleMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.display_into(f)
    }
}

fn escape_char(c: char, in_class: bool) -> String {
    match c {
        '\t' => "\\t".to_owned(),
        '\n' => "\\n".to_owned(),
        '\r' => "\\r".to_owned(),
        '\\' => "\\\\".to_owned(),
        '"' if !in_class => "\\\"".to_owned(),
        '-' | ']' if in_class => format!("\\{c}"),
        c if c.is_whitespace() || c.is_control() => format!("\\u{:04x}", c as u32),
        c => c.to_string(),
    }
}

/// Assembles a [`RuleMap`]. Referencing an id before it is defined creates
/// a forward-reference placeholder; `build` fails unless every placeholder
/// has been resolved by a later definition.
pub struct RuleMapBuilder {
    arena: PrimaryMap<SymbolHandle, Symbol>,
    rules: HashMap<IdStr, SymbolHandle>,
    pending: HashMap<IdStr, SymbolHandle>,
    empty: SymbolHandle,
    next_anon: u32,
}

impl Default for RuleMapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleMapBuilder {
    pub fn new() -> RuleMapBuilder {
        let mut arena = PrimaryMap::new();
        let empty = arena.push(Symbol {
            id: "$empty".into(),
            kind: SymbolKind::ZeroLength,
            verbatim: false,
        });
        RuleMapBuilder {
            arena,
            rules: HashMap::new(),
            pending: HashMap::new(),
            empty,
            next_anon: 0,
        }
    }

    fn push(&mut self, kind: SymbolKind) -> SymbolHandle {
        let id: IdStr = format!("{}{}:{}", ANON_PREFIX, kind.short_name(), self.next_anon).into();
        self.next_anon += 1;
        self.arena.push(Symbol {
            id,
            kind,
            verbatim: false,
        })
    }

    pub fn sequence(&mut self, members: Vec<SymbolHandle>) -> SymbolHandle {
        assert!(!members.is_empty(), "Sequence must have members");
        self.push(SymbolKind::Sequence(members))
    }

    pub fn junction(&mut self, members: Vec<SymbolHandle>) -> SymbolHandle {
        assert!(!members.is_empty(), "Junction must have members");
        self.push(SymbolKind::Junction(members))
    }

    pub fn repetition(&mut self, inner: SymbolHandle) -> SymbolHandle {
        self.push(SymbolKind::Repetition(inner))
    }

    pub fn option(&mut self, inner: SymbolHandle) -> SymbolHandle {
        self.push(SymbolKind::Option(inner))
    }

    /// Zero-or-more, composed as Option(Repetition(inner)).
    pub fn star(&mut self, inner: SymbolHandle) -> SymbolHandle {
        let repetition = self.repetition(inner);
        let option = self.option(repetition);
        self.push(SymbolKind::RepeatOption { option })
    }

    pub fn character(&mut self, c: char) -> SymbolHandle {
        self.push(SymbolKind::Character(c))
    }

    pub fn text(&mut self, text: &str) -> SymbolHandle {
        assert!(!text.is_empty(), "Text literal must not be empty");
        self.push(SymbolKind::Text(text.into()))
    }

    pub fn switch(&mut self, ranges: RangeSet) -> SymbolHandle {
        self.push(SymbolKind::Switch(ranges))
    }

    pub fn switch_range(&mut self, lo: char, hi: char) -> SymbolHandle {
        let mut ranges = RangeSet::new();
        ranges.add(lo, hi);
        self.switch(ranges)
    }

    pub fn switch_including(&mut self, chars: &[char]) -> SymbolHandle {
        let ranges = RangeSet::including(chars);
        self.switch(ranges)
    }

    pub fn switch_excluding(&mut self, chars: &[char]) -> SymbolHandle {
        let ranges = RangeSet::excluding(chars);
        self.switch(ranges)
    }

    pub fn catch_all(&mut self) -> SymbolHandle {
        self.push(SymbolKind::CatchAll)
    }

    /// The shared zero-length sentinel; also usable as an empty skip rule.
    pub fn zero_length(&mut self) -> SymbolHandle {
        self.empty
    }

    /// Resolves an id to its symbol, creating a forward-reference
    /// placeholder if the id has not been defined yet.
    pub fn reference(&mut self, id: &str) -> SymbolHandle {
        if let Some(&handle) = self.rules.get(id) {
            return handle;
        }
        if let Some(&handle) = self.pending.get(id) {
            return handle;
        }
        let id: IdStr = id.into();
        let handle = self.arena.push(Symbol {
            id: id.clone(),
            kind: SymbolKind::Implicit(None),
            verbatim: false,
        });
        self.pending.insert(id, handle);
        handle
    }

    /// Marks a symbol to be matched with the skip rule suppressed for its
    /// whole subtree, followed by one trailing skip consumption after a
    /// non-empty match. Quote-delimited constructs keep their interior
    /// exact this way while still separating from what follows them.
    pub fn verbatim(&mut self, handle: SymbolHandle) -> SymbolHandle {
        self.arena[handle].verbatim = true;
        handle
    }

    /// Defines a rule. An anonymous terminal is renamed in place so the
    /// rule entry is the terminal itself; any other definition gets a named
    /// indirection node so the id survives in the produced tokens. A
    /// pending placeholder for the id is pointed at the entry either way.
    pub fn define(&mut self, id: &str, definition: SymbolHandle) -> Result<(), GrammarError> {
        if self.rules.contains_key(id) {
            return Err(GrammarError::Reassignment(format!("rule '{id}'")));
        }
        let id: IdStr = id.into();
        let collapse = self.arena[definition].kind.is_terminal()
            && self.arena[definition].is_anonymous()
            && definition != self.empty;
        if let Some(placeholder) = self.pending.remove(&id) {
            let entry = if collapse {
                self.arena[definition].id = id.clone();
                definition
            } else {
                placeholder
            };
            match &mut self.arena[placeholder].kind {
                SymbolKind::Implicit(reference @ None) => *reference = Some(definition),
                _ => return Err(GrammarError::Reassignment(format!("rule '{id}'"))),
            }
            self.rules.insert(id, entry);
        } else if collapse {
            self.arena[definition].id = id.clone();
            self.rules.insert(id, definition);
        } else {
            let named = self.arena.push(Symbol {
                id: id.clone(),
                kind: SymbolKind::Implicit(Some(definition)),
                verbatim: false,
            });
            self.rules.insert(id, named);
        }
        Ok(())
    }

    pub fn is_defined(&self, id: &str) -> bool {
        self.rules.contains_key(id)
    }

    /// Looks up a defined rule. Pending forward references are not visible
    /// here; they only exist as targets for a later definition or import.
    pub fn lookup(&self, id: &str) -> Option<SymbolHandle> {
        self.rules.get(id).copied()
    }

    pub fn symbol(&self, handle: SymbolHandle) -> &Symbol {
        &self.arena[handle]
    }

    pub fn resolve(&self, handle: SymbolHandle) -> SymbolHandle {
        let mut current = handle;
        while let SymbolKind::Implicit(Some(next)) = &self.arena[current].kind {
            current = *next;
        }
        current
    }

    /// Same classification [`RuleMap::family`] gives after freezing.
    pub fn family(&self, handle: SymbolHandle) -> SymbolFamily {
        match &self.arena[self.resolve(handle)].kind {
            SymbolKind::Sequence(_) => SymbolFamily::Sequence,
            SymbolKind::Junction(_) => SymbolFamily::Junction,
            SymbolKind::Repetition(_) => SymbolFamily::Repetition,
            SymbolKind::Option(_) => SymbolFamily::Option,
            SymbolKind::RepeatOption { .. } => SymbolFamily::Star,
            SymbolKind::Character(_) => SymbolFamily::Character,
            SymbolKind::Text(_) => SymbolFamily::Text,
            SymbolKind::Switch(_) => SymbolFamily::Switch,
            SymbolKind::CatchAll => SymbolFamily::CatchAll,
            SymbolKind::ZeroLength | SymbolKind::Implicit(_) => SymbolFamily::ZeroLength,
        }
    }

    /// Copies one rule of another, already frozen, map into this builder:
    /// the whole reachable subgraph comes along, shared sub-rules are
    /// copied once, cycles are preserved. Resolves a pending forward
    /// reference to `id` if the definitions built so far mention it.
    pub fn import_from(&mut self, id: &str, other: &RuleMap) -> Result<(), GrammarError> {
        let source = other.require(id)?;
        if self.rules.contains_key(id) {
            return Err(GrammarError::Reassignment(format!("rule '{id}'")));
        }
        let mut memo = HashMap::new();
        let copied = self.copy_symbol(other, source, &mut memo);
        let id: IdStr = id.into();
        if let Some(placeholder) = self.pending.remove(&id) {
            match &mut self.arena[placeholder].kind {
                SymbolKind::Implicit(reference @ None) => *reference = Some(copied),
                _ => return Err(GrammarError::Reassignment(format!("rule '{id}'"))),
            }
            self.rules.insert(id, placeholder);
        } else {
            self.rules.insert(id, copied);
        }
        Ok(())
    }

    fn copy_symbol(
        &mut self,
        other: &RuleMap,
        handle: SymbolHandle,
        memo: &mut HashMap<SymbolHandle, SymbolHandle>,
    ) -> SymbolHandle {
        if handle == other.empty_handle() {
            return self.empty;
        }
        if let Some(&copied) = memo.get(&handle) {
            return copied;
        }
        // reserve the slot first so cyclic references resolve through memo
        let copied = self.arena.push(Symbol {
            id: other.symbol(handle).id.clone(),
            kind: SymbolKind::Implicit(None),
            verbatim: other.symbol(handle).verbatim,
        });
        memo.insert(handle, copied);

        let kind = match &other.symbol(handle).kind {
            SymbolKind::Sequence(members) => {
                let members = members.clone();
                SymbolKind::Sequence(
                    members
                        .into_iter()
                        .map(|m| self.copy_symbol(other, m, memo))
                        .collect(),
                )
            }
            SymbolKind::Junction(members) => {
                let members = members.clone();
                SymbolKind::Junction(
                    members
                        .into_iter()
                        .map(|m| self.copy_symbol(other, m, memo))
                        .collect(),
                )
            }
            SymbolKind::Repetition(inner) => {
                SymbolKind::Repetition(self.copy_symbol(other, *inner, memo))
            }
            SymbolKind::Option(inner) => SymbolKind::Option(self.copy_symbol(other, *inner, memo)),
            SymbolKind::RepeatOption { option } => SymbolKind::RepeatOption {
                option: self.copy_symbol(other, *option, memo),
            },
            SymbolKind::Implicit(Some(reference)) => {
                SymbolKind::Implicit(Some(self.copy_symbol(other, *reference, memo)))
            }
            SymbolKind::Implicit(None) => SymbolKind::Implicit(None),
            terminal => terminal.clone(),
        };
        self.arena[copied].kind = kind;
        copied
    }

    /// Ids referenced but not (yet) defined, sorted.
    pub fn unresolved(&self) -> Vec<IdStr> {
        let mut ids: Vec<IdStr> = self.pending.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Freezes the rule graph. Fails if any referenced id was never
    /// defined, naming every offender.
    pub fn build(self) -> Result<RuleMap, GrammarError> {
        let unresolved = self.unresolved();
        if !unresolved.is_empty() {
            return Err(GrammarError::MissingRule(unresolved.join(", ")));
        }
        debug_assert!(self
            .arena
            .values()
            .all(|s| !matches!(s.kind, SymbolKind::Implicit(None))));
        Ok(RuleMap {
            arena: self.arena,
            rules: self.rules,
            empty: self.empty,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn range_set_accepts_by_index() {
        let mut set = RangeSet::new();
        set.add('a', 'z');
        set.add('0', '9');
        assert_eq!(set.accept('q'), Some(0));
        assert_eq!(set.accept('7'), Some(1));
        assert_eq!(set.accept('Q'), None);
    }

    #[test]
    fn inverted_range_set() {
        let set = RangeSet::excluding(&['\n']);
        assert_eq!(set.accept('x'), Some(0));
        assert_eq!(set.accept('\n'), None);
    }

    #[test]
    fn forward_reference_resolves_on_definition() {
        let mut b = RuleMapBuilder::new();
        let forward = b.reference("word");
        let rep = b.repetition(forward);
        b.define("words", rep).unwrap();
        let sw = b.switch_range('a', 'z');
        b.define("word", sw).unwrap();
        let map = b.build().unwrap();
        // the rule entry collapses to the renamed terminal itself; only the
        // earlier forward reference keeps an indirection to it
        let word = map.get("word").unwrap();
        assert_eq!(map.resolve(word), word);
        assert_eq!(&*map.symbol(word).id, "word");
        assert!(map.symbol(word).kind.is_terminal());
        assert_eq!(map.resolve(forward), word);
        assert_eq!(map.family(map.get("words").unwrap()), SymbolFamily::Repetition);
    }

    #[test]
    fn unresolved_reference_fails_naming_it() {
        let mut b = RuleMapBuilder::new();
        let foo = b.reference("foo");
        let bar = b.reference("bar");
        let seq = b.sequence(vec![foo, bar]);
        b.define("top", seq).unwrap();
        let err = b.build().unwrap_err();
        match err {
            GrammarError::MissingRule(ids) => assert_eq!(ids, "bar, foo"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_definition_is_reassignment() {
        let mut b = RuleMapBuilder::new();
        let a = b.character('a');
        b.define("x", a).unwrap();
        let c = b.character('c');
        assert!(matches!(
            b.define("x", c),
            Err(GrammarError::Reassignment(_))
        ));
    }

    #[test]
    fn anonymous_terminal_is_renamed_in_place() {
        let mut b = RuleMapBuilder::new();
        let lit = b.text("if");
        b.define("kw_if", lit).unwrap();
        let map = b.build().unwrap();
        assert_eq!(&*map.symbol(map.get("kw_if").unwrap()).id, "kw_if");
        assert_eq!(map.get("kw_if").unwrap(), lit);
    }

    #[test]
    fn composite_definition_keeps_named_indirection() {
        let mut b = RuleMapBuilder::new();
        let a = b.character('a');
        let rep = b.repetition(a);
        b.define("many", rep).unwrap();
        let map = b.build().unwrap();
        let many = map.get("many").unwrap();
        assert!(matches!(
            map.symbol(many).kind,
            SymbolKind::Implicit(Some(_))
        ));
        assert_eq!(map.family(many), SymbolFamily::Repetition);
    }

    #[test]
    fn import_copies_cyclic_subgraph() {
        let mut b = RuleMapBuilder::new();
        let inner = b.reference("expr");
        let open = b.character('(');
        let close = b.character(')');
        let paren = b.sequence(vec![open, inner, close]);
        let digit = b.switch_range('0', '9');
        let junction = b.junction(vec![paren, digit]);
        b.define("expr", junction).unwrap();
        let source = b.build().unwrap();

        let mut dest_builder = RuleMapBuilder::new();
        dest_builder.import_from("expr", &source).unwrap();
        let dest = dest_builder.build().unwrap();
        let copied = dest.get("expr").unwrap();
        assert_eq!(dest.family(copied), SymbolFamily::Junction);
        // the cycle must close within the destination arena
        let resolved = dest.resolve(copied);
        if let SymbolKind::Junction(members) = &dest.symbol(resolved).kind {
            if let SymbolKind::Sequence(seq) = &dest.symbol(members[0]).kind {
                assert_eq!(dest.resolve(seq[1]), resolved);
            } else {
                panic!("expected sequence member");
            }
        } else {
            panic!("expected junction");
        }
    }

    #[test]
    fn display_round_trips_definition_syntax() {
        let mut b = RuleMapBuilder::new();
        let a = b.text("ab");
        let d = b.switch_range('0', '9');
        let rep = b.repetition(d);
        let j = b.junction(vec![a, rep]);
        b.define("item", j).unwrap();
        let map = b.build().unwrap();
        let mut out = String::new();
        map.display_into(&mut out).unwrap();
        assert_eq!(out, "item: \"ab\" | [0-9]+;\n");
        // Debug renders the same definition syntax
        assert_eq!(format!("{map:?}"), out);
    }
}

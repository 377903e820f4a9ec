use std::any::Any;
use std::collections::HashMap;

use crate::error::GrammarError;
use crate::symbol::{IdStr, RuleMap};
use crate::token::{Token, TokenView};

/// State threaded through a walk, mutable by every listener. Before each
/// listener runs, the walker publishes the start offset of the token being
/// visited, so state types can report positions without seeing the tree.
pub trait MutableState {
    fn set_position(&mut self, position: u32);
}

/// For grammars that need no walk state.
impl MutableState for () {
    fn set_position(&mut self, _position: u32) {}
}

pub type Listener<M> =
    Box<dyn Fn(&mut TokenView<'_>, &mut M) -> Result<Box<dyn Any>, GrammarError> + Send + Sync>;

/// Post-order traversal: children first, so by the time a listener runs,
/// every child payload is ready to be taken.
pub(crate) fn walk<M: MutableState>(
    token: &mut Token,
    rules: &RuleMap,
    source: &str,
    listeners: &HashMap<IdStr, Listener<M>>,
    state: &mut M,
) -> Result<(), GrammarError> {
    for child in token.children_mut() {
        walk(child, rules, source, listeners, state)?;
    }
    let id: &str = &rules.symbol(token.origin()).id;
    if let Some(listener) = listeners.get(id) {
        state.set_position(token.span().start());
        let mut view = TokenView::new(token, rules, source);
        let payload = listener(&mut view, state)?;
        token.set_payload(payload);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::Matcher;
    use crate::symbol::RuleMapBuilder;

    struct Recorder {
        positions: Vec<u32>,
    }

    impl MutableState for Recorder {
        fn set_position(&mut self, position: u32) {
            self.positions.push(position);
        }
    }

    #[test]
    fn listeners_run_post_order_with_positions() {
        let mut b = RuleMapBuilder::new();
        let digit = b.switch_range('0', '9');
        b.define("digit", digit).unwrap();
        let digit_ref = b.reference("digit");
        let rep = b.repetition(digit_ref);
        b.define("number", rep).unwrap();
        let rules = b.build().unwrap();

        let source = "42";
        let mut m = Matcher::new(&rules, rules.empty_handle(), source);
        let mut token = m.match_symbol(rules.get("number").unwrap()).unwrap();

        let mut listeners: HashMap<IdStr, Listener<Recorder>> = HashMap::new();
        listeners.insert(
            "digit".into(),
            Box::new(|view, _state| {
                let value = view.text().parse::<u32>().unwrap();
                Ok(Box::new(value))
            }),
        );
        listeners.insert(
            "number".into(),
            Box::new(|view, _state| {
                let mut total = 0u32;
                for i in 0..view.child_count() {
                    total = total * 10 + view.take_payload::<u32>(i)?;
                }
                Ok(Box::new(total))
            }),
        );

        let mut state = Recorder {
            positions: Vec::new(),
        };
        walk(&mut token, &rules, source, &listeners, &mut state).unwrap();
        assert_eq!(state.positions, vec![0, 1, 0]);
        let view = TokenView::new(&mut token, &rules, source);
        assert!(!view.has_payload(0));
        drop(view);
        let total = token
            .payload_mut()
            .take()
            .unwrap()
            .downcast::<u32>()
            .unwrap();
        assert_eq!(*total, 42);
    }
}

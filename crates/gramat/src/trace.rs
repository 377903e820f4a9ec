/// Observer for match attempts, mainly for debugging grammars.
pub trait MatchTrace {
    fn enter(&mut self, id: &str, position: u32);
    fn exit(&mut self, id: &str, position: u32, matched: bool);
}

/// Emits every attempt through `log::trace!`, indented by nesting depth.
#[derive(Default)]
pub struct LogTrace {
    depth: usize,
}

impl LogTrace {
    pub fn new() -> LogTrace {
        Self::default()
    }
}

impl MatchTrace for LogTrace {
    fn enter(&mut self, id: &str, position: u32) {
        log::trace!("{:indent$}{id} @{position}?", "", indent = self.depth * 2);
        self.depth += 1;
    }

    fn exit(&mut self, id: &str, position: u32, matched: bool) {
        self.depth = self.depth.saturating_sub(1);
        let verdict = if matched { "ok" } else { "fail" };
        log::trace!(
            "{:indent$}{id} @{position} {verdict}",
            "",
            indent = self.depth * 2
        );
    }
}

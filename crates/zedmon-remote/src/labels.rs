/// Source-label lookup, owned by the embedding debugger. The mediator only
/// consults it for watchpoint reason strings and for bare identifiers in
/// condition expressions.
pub trait LabelResolver: Send {
    /// All labels covering `address`, nearest first. May be empty.
    fn labels_at(&self, address: u16) -> Vec<String>;

    /// Resolve a label name to its address.
    fn resolve(&self, name: &str) -> Option<u16>;
}

/// Resolver used when no label source is attached.
pub struct NoLabels;

impl LabelResolver for NoLabels {
    fn labels_at(&self, _address: u16) -> Vec<String> {
        Vec::new()
    }

    fn resolve(&self, _name: &str) -> Option<u16> {
        None
    }
}

/// Marker record on a method body. A body carrying one is kept: optimizations
/// must leave its instructions untouched.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CodeFacts;

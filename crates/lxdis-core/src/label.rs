//! Labels and the label map.

use std::collections::BTreeMap;
use std::ops::Bound;

/// What a labelled address is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LabelKind {
    Unknown,
    Function,
    Jump,
    Data,
    Vtable,
}

impl LabelKind {
    /// Strength used when two labels collide at one address; the higher
    /// wins.
    fn precedence(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Data => 1,
            Self::Jump => 2,
            Self::Vtable => 3,
            Self::Function => 4,
        }
    }
}

/// A named, categorized address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub address: u32,
    pub kind: LabelKind,
    pub name: Option<String>,
}

impl Label {
    /// Creates an unnamed label.
    pub fn new(address: u32, kind: LabelKind) -> Self {
        Self {
            address,
            kind,
            name: None,
        }
    }

    /// Creates a named label.
    pub fn with_name(address: u32, kind: LabelKind, name: impl Into<String>) -> Self {
        Self {
            address,
            kind,
            name: Some(name.into()),
        }
    }

    /// Folds `other` into this label, keeping the stronger information
    /// along each axis: the higher-precedence kind wins, and an existing
    /// name is never displaced by another name.
    pub fn improve_from(&mut self, other: &Label) {
        if other.kind.precedence() > self.kind.precedence() {
            self.kind = other.kind;
        }
        let named = self.name.as_deref().is_some_and(|n| !n.is_empty());
        if !named {
            if let Some(name) = other.name.as_deref() {
                if !name.is_empty() {
                    self.name = Some(name.to_string());
                }
            }
        }
    }
}

/// Address-ordered map of labels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelMap {
    map: BTreeMap<u32, Label>,
}

impl LabelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `label`, or improves the existing label at its address.
    pub fn set(&mut self, label: Label) {
        match self.map.get_mut(&label.address) {
            Some(existing) => existing.improve_from(&label),
            None => {
                self.map.insert(label.address, label);
            }
        }
    }

    pub fn get(&self, addr: u32) -> Option<&Label> {
        self.map.get(&addr)
    }

    /// Returns the first label at an address strictly greater than `addr`.
    pub fn next_after(&self, addr: u32) -> Option<&Label> {
        self.map
            .range((Bound::Excluded(addr), Bound::Unbounded))
            .next()
            .map(|(_, l)| l)
    }

    pub fn remove(&mut self, addr: u32) {
        self.map.remove(&addr);
    }

    /// Iterates labels in address order.
    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.map.values()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stronger_kind_wins() {
        let mut labels = LabelMap::new();
        labels.set(Label::new(0x1000, LabelKind::Jump));
        labels.set(Label::new(0x1000, LabelKind::Function));
        assert_eq!(labels.get(0x1000).unwrap().kind, LabelKind::Function);
    }

    #[test]
    fn weaker_kind_never_lowers() {
        let mut labels = LabelMap::new();
        labels.set(Label::new(0x1000, LabelKind::Function));
        labels.set(Label::new(0x1000, LabelKind::Data));
        assert_eq!(labels.get(0x1000).unwrap().kind, LabelKind::Function);
    }

    #[test]
    fn vtable_outranks_jump_but_not_function() {
        let mut labels = LabelMap::new();
        labels.set(Label::new(0x1000, LabelKind::Jump));
        labels.set(Label::new(0x1000, LabelKind::Vtable));
        assert_eq!(labels.get(0x1000).unwrap().kind, LabelKind::Vtable);
        labels.set(Label::new(0x1000, LabelKind::Function));
        assert_eq!(labels.get(0x1000).unwrap().kind, LabelKind::Function);
    }

    #[test]
    fn name_fills_in_but_is_not_replaced() {
        let mut labels = LabelMap::new();
        labels.set(Label::new(0x1000, LabelKind::Jump));
        assert_eq!(labels.get(0x1000).unwrap().name, None);

        labels.set(Label::with_name(0x1000, LabelKind::Jump, "loop_top"));
        assert_eq!(labels.get(0x1000).unwrap().name.as_deref(), Some("loop_top"));

        labels.set(Label::with_name(0x1000, LabelKind::Function, "other"));
        let label = labels.get(0x1000).unwrap();
        assert_eq!(label.kind, LabelKind::Function);
        assert_eq!(label.name.as_deref(), Some("loop_top"));
    }

    #[test]
    fn empty_name_counts_as_absent() {
        let mut labels = LabelMap::new();
        labels.set(Label::with_name(0x1000, LabelKind::Data, ""));
        labels.set(Label::with_name(0x1000, LabelKind::Data, "table"));
        assert_eq!(labels.get(0x1000).unwrap().name.as_deref(), Some("table"));
    }

    #[test]
    fn next_after_is_strict() {
        let mut labels = LabelMap::new();
        labels.set(Label::new(0x1000, LabelKind::Function));
        labels.set(Label::new(0x2000, LabelKind::Jump));
        assert_eq!(labels.next_after(0x1000).unwrap().address, 0x2000);
        assert_eq!(labels.next_after(0x0fff).unwrap().address, 0x1000);
        assert!(labels.next_after(0x2000).is_none());
    }
}

//! Abstract domains of the type analysis
//!
//! A value is described by its nullness and, when it is known, its single
//! runtime type. Environments map registers or argument positions to values.

use rustc_hash::FxHashMap;
use std::fmt;
use std::hash::Hash;

use crate::program::{ClassId, InsnId, Program};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Nullness {
    Bottom,
    IsNull,
    NotNull,
    Top,
}

impl Nullness {
    pub fn leq(self, other: Nullness) -> bool {
        match (self, other) {
            (Nullness::Bottom, _) | (_, Nullness::Top) => true,
            (a, b) => a == b,
        }
    }

    pub fn join(self, other: Nullness) -> Nullness {
        match (self, other) {
            (Nullness::Bottom, x) | (x, Nullness::Bottom) => x,
            (a, b) if a == b => a,
            _ => Nullness::Top,
        }
    }
}

/// Runtime type a value can have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Int,
    Class(ClassId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SingletonType {
    Bottom,
    Known(TypeTag),
    Top,
}

impl SingletonType {
    pub fn leq(self, other: SingletonType) -> bool {
        match (self, other) {
            (SingletonType::Bottom, _) | (_, SingletonType::Top) => true,
            (a, b) => a == b,
        }
    }

    pub fn join(self, other: SingletonType) -> SingletonType {
        match (self, other) {
            (SingletonType::Bottom, x) | (x, SingletonType::Bottom) => x,
            (a, b) if a == b => a,
            _ => SingletonType::Top,
        }
    }
}

/// Product of nullness and singleton type.
///
/// The product does not smash: it is bottom only when both components are.
/// `null` is `(IsNull, Bottom)`, as a null reference has no runtime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeDomain {
    nullness: Nullness,
    singleton: SingletonType,
}

impl TypeDomain {
    pub fn new(nullness: Nullness, singleton: SingletonType) -> Self {
        Self {
            nullness,
            singleton,
        }
    }

    pub fn top() -> Self {
        Self::new(Nullness::Top, SingletonType::Top)
    }

    pub fn bottom() -> Self {
        Self::new(Nullness::Bottom, SingletonType::Bottom)
    }

    pub fn null() -> Self {
        Self::new(Nullness::IsNull, SingletonType::Bottom)
    }

    pub fn not_null(tag: TypeTag) -> Self {
        Self::new(Nullness::NotNull, SingletonType::Known(tag))
    }

    pub fn nullness(&self) -> Nullness {
        self.nullness
    }

    pub fn singleton(&self) -> SingletonType {
        self.singleton
    }

    pub fn is_top(&self) -> bool {
        self.nullness == Nullness::Top && self.singleton == SingletonType::Top
    }

    pub fn is_bottom(&self) -> bool {
        self.nullness == Nullness::Bottom && self.singleton == SingletonType::Bottom
    }

    pub fn leq(&self, other: &Self) -> bool {
        self.nullness.leq(other.nullness) && self.singleton.leq(other.singleton)
    }

    pub fn join(&self, other: &Self) -> Self {
        Self::new(
            self.nullness.join(other.nullness),
            self.singleton.join(other.singleton),
        )
    }

    /// The value, or a null that has not been overwritten yet
    pub fn join_with_null(&self) -> Self {
        self.join(&Self::null())
    }

    pub fn with_singleton(&self, singleton: SingletonType) -> Self {
        Self::new(self.nullness, singleton)
    }

    /// Render with class names resolved against `program`
    pub fn display<'a>(&'a self, program: &'a Program) -> impl fmt::Display + 'a {
        TypeDomainDisplay {
            value: self,
            program,
        }
    }
}

struct TypeDomainDisplay<'a> {
    value: &'a TypeDomain,
    program: &'a Program,
}

impl fmt::Display for TypeDomainDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value.is_top() {
            return f.write_str("T");
        }
        if self.value.is_bottom() {
            return f.write_str("_|_");
        }
        let nullness = match self.value.nullness {
            Nullness::Bottom => "_|_",
            Nullness::IsNull => "null",
            Nullness::NotNull => "non-null",
            Nullness::Top => "nullable",
        };
        match self.value.singleton {
            SingletonType::Bottom => write!(f, "{}", nullness),
            SingletonType::Top => write!(f, "{} ?", nullness),
            SingletonType::Known(TypeTag::Int) => write!(f, "{} int", nullness),
            SingletonType::Known(TypeTag::Class(class)) => {
                write!(f, "{} {}", nullness, self.program.class(class).name)
            }
        }
    }
}

/// Map-based environment. Keys absent from the map are top; the whole
/// environment collapses to `Bottom` as soon as one key is bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbstractEnvironment<K: Eq + Hash> {
    Bottom,
    Value(FxHashMap<K, TypeDomain>),
}

impl<K: Eq + Hash + Copy> AbstractEnvironment<K> {
    pub fn top() -> Self {
        AbstractEnvironment::Value(FxHashMap::default())
    }

    pub fn bottom() -> Self {
        AbstractEnvironment::Bottom
    }

    pub fn is_bottom(&self) -> bool {
        matches!(self, AbstractEnvironment::Bottom)
    }

    pub fn is_top(&self) -> bool {
        match self {
            AbstractEnvironment::Bottom => false,
            AbstractEnvironment::Value(map) => map.is_empty(),
        }
    }

    pub fn get(&self, key: K) -> TypeDomain {
        match self {
            AbstractEnvironment::Bottom => TypeDomain::bottom(),
            AbstractEnvironment::Value(map) => {
                map.get(&key).copied().unwrap_or_else(TypeDomain::top)
            }
        }
    }

    pub fn set(&mut self, key: K, value: TypeDomain) {
        if value.is_bottom() {
            *self = AbstractEnvironment::Bottom;
            return;
        }
        if let AbstractEnvironment::Value(map) = self {
            if value.is_top() {
                map.remove(&key);
            } else {
                map.insert(key, value);
            }
        }
    }

    pub fn leq(&self, other: &Self) -> bool {
        match (self, other) {
            (AbstractEnvironment::Bottom, _) => true,
            (_, AbstractEnvironment::Bottom) => false,
            (AbstractEnvironment::Value(a), AbstractEnvironment::Value(b)) => {
                // Every constraint of `other` must hold, at least as tightly, here
                b.iter().all(|(key, bv)| {
                    a.get(key)
                        .map(|av| av.leq(bv))
                        .unwrap_or_else(|| bv.is_top())
                })
            }
        }
    }

    pub fn join(&self, other: &Self) -> Self {
        match (self, other) {
            (AbstractEnvironment::Bottom, x) | (x, AbstractEnvironment::Bottom) => x.clone(),
            (AbstractEnvironment::Value(a), AbstractEnvironment::Value(b)) => {
                let joined = a
                    .iter()
                    .filter_map(|(key, av)| {
                        let value = av.join(b.get(key)?);
                        (!value.is_top()).then_some((*key, value))
                    })
                    .collect();
                AbstractEnvironment::Value(joined)
            }
        }
    }

    /// Join `other` into `self`, reporting whether `self` changed
    pub fn join_with(&mut self, other: &Self) -> bool {
        if other.leq(self) {
            return false;
        }
        *self = self.join(other);
        true
    }

    /// Non-top bindings, `None` when bottom
    pub fn bindings(&self) -> Option<&FxHashMap<K, TypeDomain>> {
        match self {
            AbstractEnvironment::Bottom => None,
            AbstractEnvironment::Value(map) => Some(map),
        }
    }
}

impl<K: Eq + Hash + Copy> Default for AbstractEnvironment<K> {
    fn default() -> Self {
        Self::top()
    }
}

/// Argument position to value, as seen at one call
pub type ArgumentTypeEnvironment = AbstractEnvironment<u32>;

/// Outgoing argument environments of a method, keyed by invoke.
/// Invokes without an entry were never reached: their environment is bottom.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentTypePartition {
    envs: FxHashMap<InsnId, ArgumentTypeEnvironment>,
}

impl ArgumentTypePartition {
    pub fn get(&self, insn: InsnId) -> ArgumentTypeEnvironment {
        self.envs
            .get(&insn)
            .cloned()
            .unwrap_or_else(ArgumentTypeEnvironment::bottom)
    }

    pub fn set(&mut self, insn: InsnId, env: ArgumentTypeEnvironment) {
        if env.is_bottom() {
            self.envs.remove(&insn);
        } else {
            self.envs.insert(insn, env);
        }
    }

    pub fn len(&self) -> usize {
        self.envs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int() -> TypeDomain {
        TypeDomain::not_null(TypeTag::Int)
    }

    #[test]
    fn test_product_is_not_smashed() {
        let value = TypeDomain::new(Nullness::Bottom, SingletonType::Known(TypeTag::Int));
        assert!(!value.is_bottom());
        assert!(TypeDomain::null().leq(&TypeDomain::top()));
        assert!(!TypeDomain::null().is_bottom());
    }

    #[test]
    fn test_join_of_null_and_object_is_nullable() {
        let joined = int().join_with_null();
        assert_eq!(joined.nullness(), Nullness::Top);
        assert_eq!(joined.singleton(), SingletonType::Known(TypeTag::Int));
        assert!(int().leq(&joined));
        assert!(!joined.leq(&int()));
    }

    #[test]
    fn test_environment_absent_key_is_top() {
        let mut env = ArgumentTypeEnvironment::top();
        assert!(env.get(3).is_top());
        env.set(0, int());
        assert_eq!(env.get(0), int());
        env.set(0, TypeDomain::top());
        assert!(env.is_top());
    }

    #[test]
    fn test_environment_collapses_to_bottom() {
        let mut env = ArgumentTypeEnvironment::top();
        env.set(0, int());
        env.set(1, TypeDomain::bottom());
        assert!(env.is_bottom());
        assert!(env.get(0).is_bottom());
    }

    #[test]
    fn test_environment_lattice() {
        let bottom = ArgumentTypeEnvironment::bottom();
        let top = ArgumentTypeEnvironment::top();
        let mut precise = ArgumentTypeEnvironment::top();
        precise.set(0, int());
        let mut other = ArgumentTypeEnvironment::top();
        other.set(0, TypeDomain::null());
        other.set(1, int());

        assert!(bottom.leq(&precise));
        assert!(precise.leq(&top));
        assert!(!top.leq(&precise));
        assert!(!precise.leq(&other));

        let joined = precise.join(&other);
        assert_eq!(joined.get(0), int().join_with_null());
        assert!(joined.get(1).is_top());
        assert_eq!(bottom.join(&precise), precise);
    }

    #[test]
    fn test_join_with_reports_change() {
        let mut env = ArgumentTypeEnvironment::bottom();
        let mut incoming = ArgumentTypeEnvironment::top();
        incoming.set(0, int());

        assert!(env.join_with(&incoming));
        assert!(!env.join_with(&incoming));
        assert!(env.join_with(&ArgumentTypeEnvironment::top()));
        assert!(env.is_top());
    }

    #[test]
    fn test_partition_absent_is_bottom() {
        let mut partition = ArgumentTypePartition::default();
        assert!(partition.get(InsnId(4)).is_bottom());
        partition.set(InsnId(4), ArgumentTypeEnvironment::top());
        assert!(partition.get(InsnId(4)).is_top());
        assert_eq!(partition.len(), 1);
    }
}

use std::any::TypeId;
use std::marker::PhantomData;

/// Describes one typed data access a system performs.
///
/// `source` identifies a data container (an entity registry, an event
/// queue); `section` narrows the access to a sub-region of it, typically
/// one component type, or is a wildcard meaning the whole source.
///
/// A `thread_safe` access asserts the system coordinates its own
/// synchronization for that data and never contributes to conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataAccess {
    source: TypeId,
    /// `None` is the wildcard: the whole source.
    section: Option<TypeId>,
    read_only: bool,
    thread_safe: bool,
}

impl DataAccess {
    /// Read access to the `Section` sub-region of `Source`.
    pub fn read<Source: 'static, Section: 'static>() -> Self {
        Self {
            source: TypeId::of::<Source>(),
            section: Some(TypeId::of::<Section>()),
            read_only: true,
            thread_safe: false,
        }
    }

    /// Write access to the `Section` sub-region of `Source`.
    pub fn write<Source: 'static, Section: 'static>() -> Self {
        Self {
            source: TypeId::of::<Source>(),
            section: Some(TypeId::of::<Section>()),
            read_only: false,
            thread_safe: false,
        }
    }

    /// Read access to the whole of `Source`.
    pub fn read_all<Source: 'static>() -> Self {
        Self {
            source: TypeId::of::<Source>(),
            section: None,
            read_only: true,
            thread_safe: false,
        }
    }

    /// Write access to the whole of `Source`.
    pub fn write_all<Source: 'static>() -> Self {
        Self {
            source: TypeId::of::<Source>(),
            section: None,
            read_only: false,
            thread_safe: false,
        }
    }

    /// Marks this access as internally synchronized.
    ///
    /// A thread-safe access never conflicts with anything.
    pub fn thread_safe(mut self) -> Self {
        self.thread_safe = true;
        self
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_thread_safe(&self) -> bool {
        self.thread_safe
    }

    /// Returns whether two accesses cannot safely happen concurrently.
    ///
    /// Accesses conflict when neither is thread-safe, they are not both
    /// reads, they target the same source, and their sections overlap
    /// (equal, or either side is the wildcard). The relation is symmetric.
    pub fn conflicts_with(&self, other: &DataAccess) -> bool {
        if self.thread_safe || other.thread_safe {
            return false;
        }
        if self.read_only && other.read_only {
            return false;
        }
        if self.source != other.source {
            return false;
        }
        match (self.section, other.section) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }
}

/// The full access declaration of one system.
///
/// Built either descriptor-by-descriptor:
///
/// ```
/// use amaranth_ecs::{AccessList, DataAccess};
///
/// struct Registry;
/// struct Position;
/// struct Velocity;
///
/// let access = AccessList::new()
///     .with(DataAccess::write::<Registry, Position>())
///     .with(DataAccess::read::<Registry, Velocity>());
/// # assert_eq!(access.entries().len(), 2);
/// ```
///
/// or declaratively from marker types:
///
/// ```
/// use amaranth_ecs::{AccessList, Reads, Writes};
/// # struct Registry; struct Position; struct Velocity;
///
/// let access = AccessList::of::<(Writes<Registry, Position>, Reads<Registry, Velocity>)>();
/// # assert_eq!(access.entries().len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct AccessList {
    entries: Vec<DataAccess>,
}

impl AccessList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the list described by an [`AccessDecl`] marker type.
    pub fn of<D: AccessDecl>() -> Self {
        let mut list = Self::new();
        D::append(&mut list);
        list
    }

    /// Appends a descriptor, builder-style.
    pub fn with(mut self, access: DataAccess) -> Self {
        self.entries.push(access);
        self
    }

    pub fn push(&mut self, access: DataAccess) {
        self.entries.push(access);
    }

    pub fn entries(&self) -> &[DataAccess] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns whether any descriptor pair across the two lists conflicts.
    pub fn conflicts_with(&self, other: &AccessList) -> bool {
        self.entries
            .iter()
            .any(|a| other.entries.iter().any(|b| a.conflicts_with(b)))
    }
}

/// A type-level access declaration.
///
/// Implemented by the marker types below and by tuples of them, so a
/// system's whole declaration is a single type parameter. The flat
/// descriptor list is minted with [`AccessList::of`].
pub trait AccessDecl {
    fn append(list: &mut AccessList);
}

/// Declares a read of the `Section` sub-region of `Source`.
pub struct Reads<Source: 'static, Section: 'static>(PhantomData<(Source, Section)>);

/// Declares a write of the `Section` sub-region of `Source`.
pub struct Writes<Source: 'static, Section: 'static>(PhantomData<(Source, Section)>);

/// Declares a read of the whole of `Source`.
pub struct ReadsAll<Source: 'static>(PhantomData<Source>);

/// Declares a write of the whole of `Source`.
pub struct WritesAll<Source: 'static>(PhantomData<Source>);

/// Marks every access declared by `D` as internally synchronized.
pub struct Synchronized<D: AccessDecl>(PhantomData<D>);

impl<Source: 'static, Section: 'static> AccessDecl for Reads<Source, Section> {
    fn append(list: &mut AccessList) {
        list.push(DataAccess::read::<Source, Section>());
    }
}

impl<Source: 'static, Section: 'static> AccessDecl for Writes<Source, Section> {
    fn append(list: &mut AccessList) {
        list.push(DataAccess::write::<Source, Section>());
    }
}

impl<Source: 'static> AccessDecl for ReadsAll<Source> {
    fn append(list: &mut AccessList) {
        list.push(DataAccess::read_all::<Source>());
    }
}

impl<Source: 'static> AccessDecl for WritesAll<Source> {
    fn append(list: &mut AccessList) {
        list.push(DataAccess::write_all::<Source>());
    }
}

impl<D: AccessDecl> AccessDecl for Synchronized<D> {
    fn append(list: &mut AccessList) {
        let start = list.entries.len();
        D::append(list);
        for entry in &mut list.entries[start..] {
            entry.thread_safe = true;
        }
    }
}

impl AccessDecl for () {
    fn append(_list: &mut AccessList) {}
}

macro_rules! impl_access_decl_tuple {
    ($($name:ident),+) => {
        impl<$($name: AccessDecl),+> AccessDecl for ($($name,)+) {
            fn append(list: &mut AccessList) {
                $($name::append(list);)+
            }
        }
    };
}

impl_access_decl_tuple!(A);
impl_access_decl_tuple!(A, B);
impl_access_decl_tuple!(A, B, C);
impl_access_decl_tuple!(A, B, C, D);
impl_access_decl_tuple!(A, B, C, D, E);
impl_access_decl_tuple!(A, B, C, D, E, F);
impl_access_decl_tuple!(A, B, C, D, E, F, G);
impl_access_decl_tuple!(A, B, C, D, E, F, G, H);

#[cfg(test)]
mod tests {
    use super::*;

    struct Registry;
    struct Events;
    struct Position;
    struct Velocity;

    #[test]
    fn both_reads_do_not_conflict() {
        let a = DataAccess::read::<Registry, Position>();
        let b = DataAccess::read::<Registry, Position>();
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn read_conflicts_with_write_of_same_section() {
        let a = DataAccess::read::<Registry, Position>();
        let b = DataAccess::write::<Registry, Position>();
        assert!(a.conflicts_with(&b));
    }

    #[test]
    fn writes_of_different_sections_do_not_conflict() {
        let a = DataAccess::write::<Registry, Position>();
        let b = DataAccess::write::<Registry, Velocity>();
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn writes_of_different_sources_do_not_conflict() {
        let a = DataAccess::write::<Registry, Position>();
        let b = DataAccess::write::<Events, Position>();
        assert!(!a.conflicts_with(&b));
    }

    #[test]
    fn wildcard_overlaps_every_section() {
        let whole = DataAccess::write_all::<Registry>();
        let narrow = DataAccess::read::<Registry, Position>();
        assert!(whole.conflicts_with(&narrow));
        assert!(narrow.conflicts_with(&whole));

        let other_whole = DataAccess::read_all::<Registry>();
        assert!(whole.conflicts_with(&other_whole));
    }

    #[test]
    fn thread_safe_never_conflicts() {
        let a = DataAccess::write::<Registry, Position>().thread_safe();
        let b = DataAccess::write::<Registry, Position>();
        assert!(!a.conflicts_with(&b));
        assert!(!b.conflicts_with(&a));
    }

    #[test]
    fn conflict_is_symmetric() {
        let a = DataAccess::read::<Registry, Position>();
        let b = DataAccess::write_all::<Registry>();
        assert_eq!(a.conflicts_with(&b), b.conflicts_with(&a));
        assert!(a.conflicts_with(&b));
    }

    #[test]
    fn list_conflict_is_any_pair() {
        let a = AccessList::new()
            .with(DataAccess::read::<Registry, Position>())
            .with(DataAccess::read::<Registry, Velocity>());
        let b = AccessList::new()
            .with(DataAccess::write::<Registry, Velocity>())
            .with(DataAccess::read::<Events, Position>());
        assert!(a.conflicts_with(&b));
        assert!(b.conflicts_with(&a));
    }

    #[test]
    fn empty_lists_do_not_conflict() {
        assert!(!AccessList::new().conflicts_with(&AccessList::new()));
    }

    #[test]
    fn decl_tuples_flatten_in_order() {
        let list =
            AccessList::of::<(Writes<Registry, Position>, Reads<Registry, Velocity>)>();
        assert_eq!(list.entries().len(), 2);
        assert!(!list.entries()[0].is_read_only());
        assert!(list.entries()[1].is_read_only());
    }

    #[test]
    fn synchronized_marks_all_entries() {
        let list = AccessList::of::<Synchronized<(WritesAll<Registry>, Reads<Events, Position>)>>();
        assert!(list.entries().iter().all(|entry| entry.is_thread_safe()));
    }
}

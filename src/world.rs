//! Reference in-memory store
//!
//! A minimal archetype store backing the test suite, benchmarks and
//! examples. Entities live in tables keyed by their exact id list; adding
//! a fact moves the entity to the table for its extended type, creating
//! tables on demand. Every table registers in a mask-keyed index at
//! creation time and stays registered when it empties out; the solver
//! skips empty tables while matching.
//!
//! The solver core never touches this type directly; it only sees the
//! [`Store`] trait.

use std::collections::HashMap;

use crate::id::Id;
use crate::store::{EntityLocation, Store, TableId, TableRecord, TableSet};

struct Table {
    ids: Vec<Id>,
    entities: Vec<Id>,
}

/// In-memory entity-component store.
pub struct World {
    next_id: u64,
    names: HashMap<String, Id>,
    labels: HashMap<Id, String>,
    tables: Vec<Table>,
    by_type: HashMap<Vec<Id>, TableId>,
    index: HashMap<Id, TableSet>,
    locations: HashMap<Id, EntityLocation>,
}

impl World {
    pub fn new() -> Self {
        let mut world = World {
            next_id: Id::FIRST_USER,
            names: HashMap::new(),
            labels: HashMap::new(),
            tables: Vec::new(),
            by_type: HashMap::new(),
            index: HashMap::new(),
            locations: HashMap::new(),
        };
        world.labels.insert(Id::WILDCARD, "*".to_string());
        world.labels.insert(Id::THIS, ".".to_string());
        world.labels.insert(Id::ISA, "IsA".to_string());
        world.labels.insert(Id::TRANSITIVE, "Transitive".to_string());
        world.labels.insert(Id::FINAL, "Final".to_string());
        // IsA is transitive and closed under itself.
        world.add(Id::ISA, Id::TRANSITIVE);
        world.add(Id::ISA, Id::FINAL);
        world
    }

    /// Intern a named entity. The first mention allocates the id, so id
    /// order follows declaration order. New entities start out in the
    /// empty-type table.
    pub fn entity(&mut self, name: &str) -> Id {
        if let Some(&id) = self.names.get(name) {
            return id;
        }
        let id = Id(self.next_id);
        self.next_id += 1;
        self.names.insert(name.to_string(), id);
        self.labels.insert(id, name.to_string());
        let table = self.ensure_table(Vec::new());
        let row = self.tables[table.0 as usize].entities.len();
        self.tables[table.0 as usize].entities.push(id);
        self.locations.insert(id, EntityLocation { table, row });
        id
    }

    /// Look up an already-interned entity by name.
    pub fn named(&self, name: &str) -> Option<Id> {
        self.names.get(name).copied()
    }

    /// Tag a predicate as transitive.
    pub fn set_transitive(&mut self, id: Id) {
        self.add(id, Id::TRANSITIVE);
    }

    /// Tag a predicate as exempt from implicit IsA expansion.
    pub fn set_final(&mut self, id: Id) {
        self.add(id, Id::FINAL);
    }

    /// Whether an entity's type contains the given id.
    pub fn has(&self, entity: Id, id: Id) -> bool {
        match self.locations.get(&entity) {
            Some(loc) => self.tables[loc.table.0 as usize].ids.contains(&id),
            None => false,
        }
    }

    /// Add a fact to an entity: a plain tag or a pair id. Moves the entity
    /// to the table matching its extended type.
    pub fn add(&mut self, entity: Id, id: Id) {
        let new_type = match self.locations.get(&entity) {
            Some(loc) => {
                let ids = &self.tables[loc.table.0 as usize].ids;
                if ids.contains(&id) {
                    return;
                }
                let mut ids = ids.clone();
                ids.push(id);
                ids.sort();
                ids
            }
            None => vec![id],
        };
        let dst = self.ensure_table(new_type);
        self.detach(entity);
        let row = self.tables[dst.0 as usize].entities.len();
        self.tables[dst.0 as usize].entities.push(entity);
        self.locations.insert(entity, EntityLocation { table: dst, row });
    }

    /// `subject IsA object`
    pub fn add_isa(&mut self, subject: Id, object: Id) {
        self.add(subject, Id::pair(Id::ISA, object));
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    fn detach(&mut self, entity: Id) {
        let Some(loc) = self.locations.remove(&entity) else {
            return;
        };
        let table = &mut self.tables[loc.table.0 as usize];
        table.entities.swap_remove(loc.row);
        if let Some(&moved) = table.entities.get(loc.row) {
            self.locations.insert(moved, EntityLocation { table: loc.table, row: loc.row });
        }
    }

    fn ensure_table(&mut self, ids: Vec<Id>) -> TableId {
        if let Some(&table) = self.by_type.get(&ids) {
            return table;
        }
        let table = TableId(self.tables.len() as u32);
        for (column, &id) in ids.iter().enumerate() {
            self.register(id, table, column);
            if id.is_pair() {
                self.register(Id::pair(id.hi(), Id::WILDCARD), table, column);
                self.register(Id::pair(Id::WILDCARD, id.lo()), table, column);
                self.register(Id::pair(Id::WILDCARD, Id::WILDCARD), table, column);
            }
        }
        self.register(Id::WILDCARD, table, 0);
        self.tables.push(Table { ids: ids.clone(), entities: Vec::new() });
        self.by_type.insert(ids, table);
        table
    }

    fn register(&mut self, mask: Id, table: TableId, column: usize) {
        self.index.entry(mask).or_default().insert(TableRecord { table, column });
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for World {
    fn resolve_table_set(&self, mask: Id) -> Option<&TableSet> {
        self.index.get(&mask)
    }

    fn entity_location(&self, entity: Id) -> Option<EntityLocation> {
        self.locations.get(&entity).copied()
    }

    fn table_ids(&self, table: TableId) -> &[Id] {
        &self.tables[table.0 as usize].ids
    }

    fn table_row_count(&self, table: TableId) -> usize {
        self.tables[table.0 as usize].entities.len()
    }

    fn table_row_entities(&self, table: TableId) -> &[Id] {
        &self.tables[table.0 as usize].entities
    }

    fn is_transitive(&self, id: Id) -> bool {
        self.has(id, Id::TRANSITIVE)
    }

    fn is_final(&self, id: Id) -> bool {
        self.has(id, Id::FINAL)
    }

    fn entity_name(&self, id: Id) -> Option<&str> {
        self.labels.get(&id).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_moves_entity_between_tables() {
        let mut w = World::new();
        let foo = w.entity("Foo");
        let e = w.entity("e");
        let first = w.entity_location(e).unwrap();
        w.add(e, foo);
        let second = w.entity_location(e).unwrap();
        assert_ne!(first.table, second.table);
        assert_eq!(w.table_row_entities(second.table), [e]);
        // The vacated empty-type table keeps existing.
        assert!(w.table_ids(first.table).is_empty());
    }

    #[test]
    fn test_emptied_tables_stay_registered() {
        let mut w = World::new();
        let foo = w.entity("Foo");
        let bar = w.entity("Bar");
        let e = w.entity("e");
        w.add(e, foo);
        let mid = w.entity_location(e).unwrap().table;
        w.add(e, bar);
        assert_eq!(w.table_row_count(mid), 0);
        let set = w.resolve_table_set(foo).unwrap();
        assert!(set.get(mid).is_some());
    }

    #[test]
    fn test_pair_masks_are_indexed() {
        let mut w = World::new();
        let likes = w.entity("Likes");
        let a = w.entity("a");
        let b = w.entity("b");
        w.add(a, Id::pair(likes, b));
        let t = w.entity_location(a).unwrap().table;
        for mask in [
            Id::pair(likes, b),
            Id::pair(likes, Id::WILDCARD),
            Id::pair(Id::WILDCARD, b),
            Id::pair(Id::WILDCARD, Id::WILDCARD),
        ] {
            let set = w.resolve_table_set(mask).unwrap();
            assert!(set.get(t).is_some(), "missing table under {:?}", mask);
        }
    }

    #[test]
    fn test_index_column_is_first_match() {
        let mut w = World::new();
        let likes = w.entity("Likes");
        let tag = w.entity("Tag");
        let a = w.entity("a");
        let b = w.entity("b");
        let c = w.entity("c");
        w.add(a, tag);
        w.add(a, Id::pair(likes, b));
        w.add(a, Id::pair(likes, c));
        let t = w.entity_location(a).unwrap().table;
        let rec = *w.resolve_table_set(Id::pair(likes, Id::WILDCARD)).unwrap().get(t).unwrap();
        // Type sorts the plain tag before both pairs.
        assert_eq!(w.table_ids(t)[rec.column], Id::pair(likes, b));
        assert_eq!(rec.column, 1);
    }

    #[test]
    fn test_type_is_sorted() {
        let mut w = World::new();
        let likes = w.entity("Likes");
        let tag = w.entity("Tag");
        let a = w.entity("a");
        let b = w.entity("b");
        w.add(a, Id::pair(likes, b));
        w.add(a, tag);
        let t = w.entity_location(a).unwrap().table;
        assert_eq!(w.table_ids(t), [tag, Id::pair(likes, b)]);
    }

    #[test]
    fn test_meta_tags_are_facts() {
        let mut w = World::new();
        assert!(w.is_transitive(Id::ISA));
        assert!(w.is_final(Id::ISA));

        let likes = w.entity("Likes");
        assert!(!w.is_transitive(likes));
        w.set_transitive(likes);
        assert!(w.is_transitive(likes));
        assert!(w.has(likes, Id::TRANSITIVE));
        assert!(!w.is_final(likes));
    }

    #[test]
    fn test_swap_remove_fixes_moved_row() {
        let mut w = World::new();
        let foo = w.entity("Foo");
        let bar = w.entity("Bar");
        let a = w.entity("a");
        let b = w.entity("b");
        w.add(a, foo);
        w.add(b, foo);
        // a leaves the Foo table; b must be relocated to row 0.
        w.add(a, bar);
        let loc = w.entity_location(b).unwrap();
        assert_eq!(loc.row, 0);
        assert_eq!(w.table_row_entities(loc.table), [b]);
    }
}

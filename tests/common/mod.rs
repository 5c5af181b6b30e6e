//! Shared fixtures for the solver integration tests
//!
//! Builds the star-wars fact set one fact at a time, in declaration
//! order. Table creation order (and with it result order) follows from
//! that sequence, so tests can assert exact enumeration orders.

use solvent::{Id, RuleIter, Store, World};

/// Opt-in tracing output for debugging test runs.
#[allow(dead_code)]
pub fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn isa(w: &mut World, subject: &str, object: &str) {
    let s = w.entity(subject);
    let o = w.entity(object);
    w.add_isa(s, o);
}

fn tag(w: &mut World, pred: &str, subject: &str) {
    let p = w.entity(pred);
    let s = w.entity(subject);
    w.add(s, p);
}

fn rel(w: &mut World, pred: &str, subject: &str, object: &str) {
    let p = w.entity(pred);
    let s = w.entity(subject);
    let o = w.entity(object);
    w.add(s, Id::pair(p, o));
}

/// The fact set used across the suite.
pub fn star_wars() -> World {
    let mut w = World::new();

    isa(&mut w, "CelestialBody", "Thing");
    isa(&mut w, "Planet", "CelestialBody");
    isa(&mut w, "Moon", "CelestialBody");
    isa(&mut w, "Person", "Thing");
    isa(&mut w, "Machine", "Thing");
    isa(&mut w, "SentientMachine", "Machine");
    isa(&mut w, "Character", "Person");
    isa(&mut w, "Human", "Character");
    isa(&mut w, "Droid", "Character");
    isa(&mut w, "Droid", "SentientMachine");
    isa(&mut w, "Creature", "Character");
    isa(&mut w, "Wookie", "Creature");
    isa(&mut w, "Vehicle", "Machine");
    isa(&mut w, "Transport", "Vehicle");
    isa(&mut w, "Transport", "Container");
    isa(&mut w, "SpaceShip", "Transport");
    isa(&mut w, "Speeder", "Transport");
    isa(&mut w, "CorellianLightFreighter", "SpaceShip");
    isa(&mut w, "MilleniumFalcon", "CorellianLightFreighter");
    isa(&mut w, "XWing", "SpaceShip");
    isa(&mut w, "YWing", "SpaceShip");
    isa(&mut w, "Cyborg", "SentientMachine");
    isa(&mut w, "Cyborg", "Human");
    tag(&mut w, "Sentient", "Droid");
    tag(&mut w, "Sentient", "Human");
    rel(&mut w, "Faction", "XWing", "Rebellion");
    isa(&mut w, "Rebellion", "Faction");
    isa(&mut w, "FirstOrder", "Faction");
    rel(&mut w, "AtWar", "FirstOrder", "Rebellion");
    rel(&mut w, "AtWar", "Rebellion", "FirstOrder");
    tag(&mut w, "Human", "Luke");
    tag(&mut w, "Human", "Leia");
    tag(&mut w, "Human", "Rey");
    tag(&mut w, "Human", "HanSolo");
    tag(&mut w, "Human", "BenSolo");
    tag(&mut w, "Cyborg", "Grievous");
    tag(&mut w, "Creature", "Yoda");
    tag(&mut w, "Jedi", "Yoda");
    tag(&mut w, "Jedi", "Luke");
    tag(&mut w, "Jedi", "Leia");
    tag(&mut w, "Jedi", "Rey");
    tag(&mut w, "Sith", "DarthVader");
    tag(&mut w, "Sith", "Palpatine");
    tag(&mut w, "Droid", "R2D2");
    tag(&mut w, "Droid", "C3PO");
    tag(&mut w, "Droid", "BB8");
    tag(&mut w, "Wookie", "Chewbacca");
    rel(&mut w, "HomePlanet", "Yoda", "Dagobah");
    rel(&mut w, "HomePlanet", "Luke", "Tatooine");
    rel(&mut w, "HomePlanet", "Rey", "Tatooine");
    rel(&mut w, "HomePlanet", "BB8", "Tatooine");
    rel(&mut w, "HomePlanet", "DarthVader", "Mustafar");
    rel(&mut w, "Parent", "Luke", "DarthVader");
    rel(&mut w, "Parent", "Leia", "DarthVader");
    rel(&mut w, "Parent", "BenSolo", "HanSolo");
    rel(&mut w, "Parent", "BenSolo", "Leia");
    rel(&mut w, "Enemy", "Luke", "Palpatine");
    rel(&mut w, "Enemy", "Luke", "DarthVader");
    rel(&mut w, "Enemy", "Yoda", "Palpatine");
    rel(&mut w, "Enemy", "Yoda", "DarthVader");
    rel(&mut w, "Enemy", "Rey", "Palpatine");
    rel(&mut w, "Likes", "Leia", "HanSolo");
    rel(&mut w, "Likes", "HanSolo", "Leia");
    rel(&mut w, "Likes", "Fin", "Rey");
    rel(&mut w, "Likes", "Rey", "Ben");

    w
}

/// Printable label of an id: its name, or `(pred,obj)` for pairs.
pub fn label(w: &World, id: Id) -> String {
    if id.is_pair() {
        format!("({},{})", label(w, id.hi()), label(w, id.lo()))
    } else {
        match w.entity_name(id) {
            Some(name) => name.to_string(),
            None => format!("#{}", id.0),
        }
    }
}

#[allow(dead_code)]
pub fn entity_names(w: &World, it: &RuleIter<'_>) -> Vec<String> {
    it.entities().iter().map(|&e| label(w, e)).collect()
}

#[allow(dead_code)]
pub fn component_names(w: &World, it: &RuleIter<'_>) -> Vec<String> {
    it.components().iter().map(|&c| label(w, c)).collect()
}

#[allow(dead_code)]
pub fn var_name(w: &World, it: &RuleIter<'_>, var: usize) -> String {
    label(w, it.variable_value(var))
}

//! The fixed table of names a script can see.
//!
//! Every global binding comes from this table; nothing else is reachable
//! from a script. The same table renders the capability list shown to the
//! model, so the prompt and the sandbox cannot drift apart.

use std::collections::BTreeMap;

use crate::value::{Builtin, Scope, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CapabilityGroup {
    /// three.js-style classes, `CSG` and the `THREE` namespace.
    Geometry,
    /// Language built-ins such as `Math` and `Array`.
    Language,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Entry {
    Builtin,
    Constant(f64),
}

const GEOMETRY: &[(&str, Entry)] = &[
    ("Box3", Entry::Builtin),
    ("BoxGeometry", Entry::Builtin),
    ("BufferAttribute", Entry::Builtin),
    ("BufferGeometry", Entry::Builtin),
    ("CSG", Entry::Builtin),
    ("Color", Entry::Builtin),
    ("ConeGeometry", Entry::Builtin),
    ("CubicBezierCurve", Entry::Builtin),
    ("CylinderGeometry", Entry::Builtin),
    ("EllipseCurve", Entry::Builtin),
    ("Euler", Entry::Builtin),
    ("ExtrudeGeometry", Entry::Builtin),
    ("Float32BufferAttribute", Entry::Builtin),
    ("Group", Entry::Builtin),
    ("LatheGeometry", Entry::Builtin),
    ("LineCurve", Entry::Builtin),
    ("MathUtils", Entry::Builtin),
    ("Mesh", Entry::Builtin),
    ("MeshBasicMaterial", Entry::Builtin),
    ("MeshLambertMaterial", Entry::Builtin),
    ("MeshPhongMaterial", Entry::Builtin),
    ("MeshPhysicalMaterial", Entry::Builtin),
    ("MeshStandardMaterial", Entry::Builtin),
    ("Object3D", Entry::Builtin),
    ("Path", Entry::Builtin),
    ("QuadraticBezierCurve", Entry::Builtin),
    ("Shape", Entry::Builtin),
    ("SphereGeometry", Entry::Builtin),
    ("THREE", Entry::Builtin),
    ("TorusGeometry", Entry::Builtin),
    ("Vector2", Entry::Builtin),
    ("Vector3", Entry::Builtin),
    ("FrontSide", Entry::Constant(0.0)),
    ("BackSide", Entry::Constant(1.0)),
    ("DoubleSide", Entry::Constant(2.0)),
];

const LANGUAGE: &[(&str, Entry)] = &[
    ("Array", Entry::Builtin),
    ("Boolean", Entry::Builtin),
    ("Error", Entry::Builtin),
    ("Float32Array", Entry::Builtin),
    ("Float64Array", Entry::Builtin),
    ("Int32Array", Entry::Builtin),
    ("Math", Entry::Builtin),
    ("Number", Entry::Builtin),
    ("Object", Entry::Builtin),
    ("RangeError", Entry::Builtin),
    ("String", Entry::Builtin),
    ("TypeError", Entry::Builtin),
    ("Uint16Array", Entry::Builtin),
    ("Uint32Array", Entry::Builtin),
    ("Uint8Array", Entry::Builtin),
    ("console", Entry::Builtin),
    ("isFinite", Entry::Builtin),
    ("isNaN", Entry::Builtin),
    ("parseFloat", Entry::Builtin),
    ("parseInt", Entry::Builtin),
    ("Infinity", Entry::Constant(f64::INFINITY)),
    ("NaN", Entry::Constant(f64::NAN)),
];

/// Names exposed to a script, with the group each belongs to.
#[derive(Debug, Clone)]
pub struct Capabilities {
    entries: BTreeMap<&'static str, (CapabilityGroup, Entry)>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::standard()
    }
}

impl Capabilities {
    /// The full table.
    pub fn standard() -> Self {
        let geometry = GEOMETRY
            .iter()
            .map(|(name, entry)| (*name, (CapabilityGroup::Geometry, *entry)));
        let language = LANGUAGE
            .iter()
            .map(|(name, entry)| (*name, (CapabilityGroup::Language, *entry)));
        Self {
            entries: geometry.chain(language).collect(),
        }
    }

    /// Removes one name; referencing it in a script becomes a
    /// `ReferenceError`.
    pub fn without(mut self, name: &str) -> Self {
        self.entries.remove(name);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.keys().copied()
    }

    pub fn group(&self, group: CapabilityGroup) -> Vec<&'static str> {
        self.entries
            .iter()
            .filter(|(_, (g, _))| *g == group)
            .map(|(name, _)| *name)
            .collect()
    }

    /// Geometry names worth listing in a prompt; the `THREE` namespace only
    /// aliases them.
    pub fn geometry_names(&self) -> Vec<&'static str> {
        self.group(CapabilityGroup::Geometry)
            .into_iter()
            .filter(|name| *name != "THREE")
            .collect()
    }

    pub(crate) fn get(&self, name: &str) -> Option<Value> {
        let (name, (_, entry)) = self.entries.get_key_value(name)?;
        Some(match entry {
            Entry::Builtin => Value::Builtin(Builtin::global(name)),
            Entry::Constant(value) => Value::Number(*value),
        })
    }

    /// `THREE.<key>`: any geometry capability except `CSG`, which lives in
    /// its own package.
    pub(crate) fn three_member(&self, key: &str) -> Option<Value> {
        match self.entries.get(key) {
            Some((CapabilityGroup::Geometry, _)) if !matches!(key, "THREE" | "CSG") => self.get(key),
            _ => None,
        }
    }

    /// Declares every entry as an immutable global.
    pub(crate) fn seed(&self, globals: &Scope) {
        for name in self.entries.keys() {
            if let Some(value) = self.get(name) {
                globals.declare((*name).into(), value, false);
            }
        }
    }
}

/// Names in the standard table, sorted.
pub fn capability_names() -> Vec<&'static str> {
    Capabilities::standard().names().collect()
}

#[cfg(test)]
mod tests {
    use super::{CapabilityGroup, Capabilities, capability_names};
    use crate::value::{Scope, Value};

    #[test]
    fn standard_table_has_no_module_loaders() {
        let capabilities = Capabilities::standard();
        for forbidden in ["require", "import", "process", "fetch", "eval", "Function"] {
            assert!(!capabilities.contains(forbidden), "{forbidden} must not be exposed");
        }
        assert!(capabilities.contains("CSG"));
        assert!(capabilities.contains("Math"));
    }

    #[test]
    fn three_namespace_aliases_geometry_classes() {
        let capabilities = Capabilities::standard();
        assert!(matches!(capabilities.three_member("Mesh"), Some(Value::Builtin(_))));
        assert!(matches!(capabilities.three_member("DoubleSide"), Some(Value::Number(n)) if n == 2.0));
        assert!(capabilities.three_member("Math").is_none());
        assert!(capabilities.three_member("CSG").is_none());
    }

    #[test]
    fn removed_names_are_not_seeded() {
        let capabilities = Capabilities::standard().without("CSG");
        let globals = Scope::root();
        capabilities.seed(&globals);
        assert!(globals.has_own("Mesh"));
        assert!(!globals.has_own("CSG"));
        assert!(!capabilities.geometry_names().contains(&"CSG"));
    }

    #[test]
    fn names_are_sorted_and_grouped() {
        let names = capability_names();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
        let language = Capabilities::standard().group(CapabilityGroup::Language);
        assert!(language.contains(&"parseFloat"));
        assert!(!language.contains(&"Mesh"));
    }
}

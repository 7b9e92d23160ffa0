//! Per-kind matching policy and the immutable resource catalog.
//!
//! Every resource kind carries a [`KindPolicy`]: the distance multiplier used
//! by the legacy matcher, the [`PathConstraints`] used by graph search, and
//! whether the kind is a warehoused good (which enables the rebalancing and
//! import passes). Policies are registered once through [`CatalogBuilder`]
//! and frozen into a [`ResourceCatalog`]; jobs resolve their policy by index
//! instead of switching on the kind per offer.

use crate::id::ResourceKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::{BitAnd, BitOr};

// ---------------------------------------------------------------------------
// Lane classes
// ---------------------------------------------------------------------------

/// Bit set of lane classes a carrier may travel on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LaneClasses(pub u8);

impl LaneClasses {
    pub const NONE: LaneClasses = LaneClasses(0);
    pub const VEHICLE: LaneClasses = LaneClasses(1 << 0);
    pub const CARGO: LaneClasses = LaneClasses(1 << 1);
    pub const PEDESTRIAN: LaneClasses = LaneClasses(1 << 2);
    pub const TRANSIT: LaneClasses = LaneClasses(1 << 3);

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// True if the two sets share at least one class.
    pub fn intersects(self, other: LaneClasses) -> bool {
        self.0 & other.0 != 0
    }

    pub fn contains(self, other: LaneClasses) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for LaneClasses {
    type Output = LaneClasses;

    fn bitor(self, rhs: LaneClasses) -> LaneClasses {
        LaneClasses(self.0 | rhs.0)
    }
}

impl BitAnd for LaneClasses {
    type Output = LaneClasses;

    fn bitand(self, rhs: LaneClasses) -> LaneClasses {
        LaneClasses(self.0 & rhs.0)
    }
}

// ---------------------------------------------------------------------------
// Path constraints
// ---------------------------------------------------------------------------

/// When off-network (aerial) carriers may compete in graph search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AirService {
    /// Air carriers are resolved to a graph node like everybody else.
    #[default]
    Disabled,
    /// Air carriers compete with a flat cost in every mode.
    Always,
    /// Air carriers only mop up leftovers in the supply-soaking pass.
    SoakOnly,
}

/// Graph-search policy of a resource kind.
///
/// A kind with no lane classes is matched by the legacy matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConstraints {
    pub lanes: LaneClasses,
    /// Transit stops attached to segments may be used as shortcuts.
    pub public_transport: bool,
    pub air_service: AirService,
    pub min_query_satisfy: u8,
    pub min_query_soak: u8,
    pub min_object_satisfy: u8,
    pub min_object_soak: u8,
}

impl PathConstraints {
    /// No graph constraint: the kind is matched by straight-line proximity.
    pub const LEGACY: PathConstraints = PathConstraints {
        lanes: LaneClasses::NONE,
        public_transport: false,
        air_service: AirService::Disabled,
        min_query_satisfy: 0,
        min_query_soak: 0,
        min_object_satisfy: 0,
        min_object_soak: 0,
    };

    /// Goods shipped between industries and warehouses by any cargo carrier.
    pub const CARGO: PathConstraints = PathConstraints {
        lanes: LaneClasses(LaneClasses::VEHICLE.0 | LaneClasses::CARGO.0),
        public_transport: true,
        air_service: AirService::Disabled,
        min_query_satisfy: 1,
        min_query_soak: 1,
        min_object_satisfy: 0,
        min_object_soak: 0,
    };

    /// Services run with capacitated road vehicles (garbage trucks, hearses).
    /// Demand accumulates for a couple of bands before a truck is sent.
    pub const ROAD_SERVICE: PathConstraints = PathConstraints {
        lanes: LaneClasses::VEHICLE,
        public_transport: false,
        air_service: AirService::Disabled,
        min_query_satisfy: 0,
        min_query_soak: 1,
        min_object_satisfy: 2,
        min_object_soak: 2,
    };

    pub fn uses_graph(&self) -> bool {
        !self.lanes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Kind policy
// ---------------------------------------------------------------------------

/// Distance multiplier used when a kind does not specify one.
pub const DEFAULT_DISTANCE_MULTIPLIER: f32 = 1e-7;

fn default_multiplier() -> f32 {
    DEFAULT_DISTANCE_MULTIPLIER
}

/// Everything the matchers need to know about one resource kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindPolicy {
    pub name: String,
    #[serde(default)]
    pub constraints: PathConstraints,
    /// Scales squared distance in the legacy proximity score. Negative
    /// values make distant matches preferable.
    #[serde(default = "default_multiplier")]
    pub distance_multiplier: f32,
    /// Warehoused goods also run the rebalancing and import passes.
    #[serde(default)]
    pub warehoused: bool,
}

impl KindPolicy {
    pub fn legacy(name: &str, distance_multiplier: f32) -> Self {
        Self {
            name: name.to_string(),
            constraints: PathConstraints::LEGACY,
            distance_multiplier,
            warehoused: false,
        }
    }

    pub fn with_constraints(mut self, constraints: PathConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn warehoused(mut self) -> Self {
        self.warehoused = true;
        self
    }

    /// Legacy service radius: matches with a squared distance under this
    /// stop the search early.
    pub fn service_radius(&self) -> f32 {
        if self.distance_multiplier == 0.0 {
            0.0
        } else {
            0.01 / self.distance_multiplier
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while building a catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog has no resource kinds")]
    Empty,
    #[error("duplicate resource kind '{0}'")]
    DuplicateName(String),
    #[error("too many resource kinds: {0}")]
    TooMany(usize),
    #[error("resource kind '{name}' has invalid distance multiplier {value}")]
    InvalidMultiplier { name: String, value: f32 },
}

// ---------------------------------------------------------------------------
// Builder and catalog
// ---------------------------------------------------------------------------

/// Collects kind policies. Registration order assigns kind indices.
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    kinds: Vec<KindPolicy>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a kind. Returns the id it will have in the built catalog.
    pub fn register(&mut self, policy: KindPolicy) -> ResourceKind {
        let id = ResourceKind(self.kinds.len() as u16);
        self.kinds.push(policy);
        id
    }

    /// Validate and freeze the catalog.
    pub fn build(self) -> Result<ResourceCatalog, CatalogError> {
        if self.kinds.is_empty() {
            return Err(CatalogError::Empty);
        }
        if self.kinds.len() > u16::MAX as usize {
            return Err(CatalogError::TooMany(self.kinds.len()));
        }

        let mut by_name = HashMap::with_capacity(self.kinds.len());
        for (index, policy) in self.kinds.iter().enumerate() {
            if !policy.distance_multiplier.is_finite() {
                return Err(CatalogError::InvalidMultiplier {
                    name: policy.name.clone(),
                    value: policy.distance_multiplier,
                });
            }
            if by_name
                .insert(policy.name.clone(), ResourceKind(index as u16))
                .is_some()
            {
                return Err(CatalogError::DuplicateName(policy.name.clone()));
            }
        }

        Ok(ResourceCatalog {
            kinds: self.kinds,
            by_name,
        })
    }
}

/// Immutable table of kind policies, indexed by [`ResourceKind`].
#[derive(Debug, Clone)]
pub struct ResourceCatalog {
    kinds: Vec<KindPolicy>,
    by_name: HashMap<String, ResourceKind>,
}

impl ResourceCatalog {
    /// Build a catalog straight from a list of policies.
    pub fn from_policies(policies: Vec<KindPolicy>) -> Result<Self, CatalogError> {
        let mut builder = CatalogBuilder::new();
        for policy in policies {
            builder.register(policy);
        }
        builder.build()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    pub fn contains(&self, kind: ResourceKind) -> bool {
        kind.index() < self.kinds.len()
    }

    pub fn get(&self, kind: ResourceKind) -> Option<&KindPolicy> {
        self.kinds.get(kind.index())
    }

    pub fn kind_by_name(&self, name: &str) -> Option<ResourceKind> {
        self.by_name.get(name).copied()
    }

    /// All kinds in index order.
    pub fn kinds(&self) -> impl Iterator<Item = ResourceKind> + '_ {
        (0..self.kinds.len()).map(|i| ResourceKind(i as u16))
    }

    /// The default catalog of city services and goods.
    pub fn city_services() -> Self {
        let mut b = CatalogBuilder::new();

        // Road services with capacitated vehicles.
        b.register(
            KindPolicy::legacy("garbage", 5e-7).with_constraints(PathConstraints::ROAD_SERVICE),
        );
        b.register(KindPolicy::legacy("crime", 1e-5).with_constraints(PathConstraints {
            air_service: AirService::SoakOnly,
            ..PathConstraints::ROAD_SERVICE
        }));
        b.register(
            KindPolicy::legacy("dead", 1e-5).with_constraints(PathConstraints::ROAD_SERVICE),
        );

        // Warehoused goods.
        for name in [
            "ore",
            "coal",
            "glass",
            "metals",
            "logs",
            "lumber",
            "paper",
            "planed_timber",
            "oil",
            "petrol",
            "petroleum",
            "plastics",
            "grain",
            "food",
            "flours",
            "animal_products",
            "goods",
            "luxury_products",
        ] {
            b.register(
                KindPolicy::legacy(name, 1e-7)
                    .with_constraints(PathConstraints::CARGO)
                    .warehoused(),
            );
        }
        b.register(KindPolicy::legacy("fish", 1e-5).with_constraints(PathConstraints::CARGO));

        // Everything else is matched by proximity.
        for (name, multiplier) in [
            ("sick", 1e-6),
            ("fire", 1e-5),
            ("worker", 1e-7),
            ("student", 2e-7),
            ("family", 1e-8),
            ("shopping", 2e-7),
            ("entertainment", 2e-7),
            ("taxi", 1e-5),
            ("snow", 5e-7),
            ("road_maintenance", 5e-7),
            ("park_maintenance", 5e-7),
            ("mail", 1e-5),
            ("forest_fire", 1e-5),
            ("collapsed", 1e-5),
            ("fire_air", 1e-5),
            ("sick_air", 1e-6),
            ("tourist", 2e-7),
            ("dummy_car", -1e-8),
        ] {
            b.register(KindPolicy::legacy(name, multiplier));
        }

        // The registrations above are unique and finite.
        match b.build() {
            Ok(catalog) => catalog,
            Err(err) => unreachable!("default catalog is valid: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_class_set_operations() {
        let cargo = LaneClasses::VEHICLE | LaneClasses::CARGO;
        assert!(cargo.intersects(LaneClasses::VEHICLE));
        assert!(!cargo.intersects(LaneClasses::PEDESTRIAN));
        assert!(cargo.contains(LaneClasses::CARGO));
        assert_eq!(cargo & LaneClasses::CARGO, LaneClasses::CARGO);
        assert!(LaneClasses::NONE.is_empty());
    }

    #[test]
    fn builder_assigns_sequential_ids() {
        let mut b = CatalogBuilder::new();
        let a = b.register(KindPolicy::legacy("a", 1e-7));
        let c = b.register(KindPolicy::legacy("c", 1e-7));
        assert_eq!(a, ResourceKind(0));
        assert_eq!(c, ResourceKind(1));

        let catalog = b.build().unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.kind_by_name("c"), Some(ResourceKind(1)));
        assert_eq!(catalog.get(ResourceKind(0)).unwrap().name, "a");
        assert!(catalog.get(ResourceKind(2)).is_none());
    }

    #[test]
    fn empty_catalog_is_rejected() {
        assert!(matches!(CatalogBuilder::new().build(), Err(CatalogError::Empty)));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut b = CatalogBuilder::new();
        b.register(KindPolicy::legacy("dup", 1e-7));
        b.register(KindPolicy::legacy("dup", 1e-6));
        assert!(matches!(b.build(), Err(CatalogError::DuplicateName(n)) if n == "dup"));
    }

    #[test]
    fn non_finite_multiplier_is_rejected() {
        let mut b = CatalogBuilder::new();
        b.register(KindPolicy::legacy("bad", f32::NAN));
        assert!(matches!(b.build(), Err(CatalogError::InvalidMultiplier { .. })));
    }

    #[test]
    fn service_radius_follows_multiplier() {
        assert_eq!(KindPolicy::legacy("k", 0.0).service_radius(), 0.0);
        let r = KindPolicy::legacy("k", 1e-5).service_radius();
        assert!((r - 1000.0).abs() < 1e-2);
    }

    #[test]
    fn city_services_catalog_shape() {
        let catalog = ResourceCatalog::city_services();

        let goods = catalog.get(catalog.kind_by_name("goods").unwrap()).unwrap();
        assert!(goods.warehoused);
        assert!(goods.constraints.uses_graph());
        assert!(goods.constraints.public_transport);

        let garbage = catalog.get(catalog.kind_by_name("garbage").unwrap()).unwrap();
        assert!(!garbage.warehoused);
        assert_eq!(garbage.constraints.min_object_satisfy, 2);

        let crime = catalog.get(catalog.kind_by_name("crime").unwrap()).unwrap();
        assert_eq!(crime.constraints.air_service, AirService::SoakOnly);

        let shopping = catalog.get(catalog.kind_by_name("shopping").unwrap()).unwrap();
        assert!(!shopping.constraints.uses_graph());
    }
}

//! Unit partitioning: splitting the reachable methods into independently
//! scheduled analysis units.
//!
//! The resolver controls concurrency granularity only; any total,
//! deterministic, time-invariant partition yields the same analysis result.

/// Partition key of a method.
///
/// `Unknown` is a reserved sentinel meaning "exclude this method from the
/// analysis entirely" (opaque library code).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UnitType<M> {
    /// One unit per method (finest grain, maximal parallelism).
    Method(M),
    /// One unit per class.
    Class(String),
    /// One unit per package.
    Package(String),
    /// A single unit for everything (fully sequential).
    Singleton,
    /// Not part of the analysis.
    Unknown,
}

impl<M> UnitType<M> {
    pub fn is_unknown(&self) -> bool {
        matches!(self, UnitType::Unknown)
    }
}

/// Maps every method to its unit. Must be total, deterministic and
/// time-invariant for the whole run.
pub trait UnitResolver<M>: Send + Sync {
    fn resolve(&self, method: &M) -> UnitType<M>;
}

impl<M, T> UnitResolver<M> for T
where
    T: Fn(&M) -> UnitType<M> + Send + Sync,
{
    fn resolve(&self, method: &M) -> UnitType<M> {
        self(method)
    }
}

/// One unit per method.
pub struct MethodUnitResolver;

impl<M: Clone + Send + Sync> UnitResolver<M> for MethodUnitResolver {
    fn resolve(&self, method: &M) -> UnitType<M> {
        UnitType::Method(method.clone())
    }
}

/// One unit per class. `class_of` extracts the class name of a method;
/// `None` excludes the method. With `fold_nested`, nested classes
/// (`Outer$Inner`) share their outer class's unit.
pub struct ClassUnitResolver<K> {
    class_of: K,
    fold_nested: bool,
}

impl<K> ClassUnitResolver<K> {
    pub fn new(class_of: K) -> Self {
        Self {
            class_of,
            fold_nested: false,
        }
    }

    pub fn with_fold_nested(mut self, fold_nested: bool) -> Self {
        self.fold_nested = fold_nested;
        self
    }
}

impl<M, K> UnitResolver<M> for ClassUnitResolver<K>
where
    K: Fn(&M) -> Option<String> + Send + Sync,
{
    fn resolve(&self, method: &M) -> UnitType<M> {
        match (self.class_of)(method) {
            Some(mut class) => {
                if self.fold_nested {
                    if let Some(pos) = class.find('$') {
                        class.truncate(pos);
                    }
                }
                UnitType::Class(class)
            }
            None => UnitType::Unknown,
        }
    }
}

/// One unit per package. `package_of` extracts the package name of a method;
/// `None` excludes the method.
pub struct PackageUnitResolver<K> {
    package_of: K,
}

impl<K> PackageUnitResolver<K> {
    pub fn new(package_of: K) -> Self {
        Self { package_of }
    }
}

impl<M, K> UnitResolver<M> for PackageUnitResolver<K>
where
    K: Fn(&M) -> Option<String> + Send + Sync,
{
    fn resolve(&self, method: &M) -> UnitType<M> {
        match (self.package_of)(method) {
            Some(package) => UnitType::Package(package),
            None => UnitType::Unknown,
        }
    }
}

/// Everything in one unit.
pub struct SingletonUnitResolver;

impl<M> UnitResolver<M> for SingletonUnitResolver {
    fn resolve(&self, _method: &M) -> UnitType<M> {
        UnitType::Singleton
    }
}

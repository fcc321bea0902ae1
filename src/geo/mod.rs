//! Geolocation Module
//!
//! Maps peer addresses to coordinates and measures the distance between them.
//! Coordinates are never stored; they are resolved again for every ranking.

mod maxmind;

pub use maxmind::MaxMindGeoResolver;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use crate::config::GeoOverride;

/// Nautical miles per degree of arc, expressed in statute miles
const MILES_PER_DEGREE: f64 = 60.0 * 1.1515;

/// Kilometres per statute mile
const KM_PER_MILE: f64 = 1.609344;

/// Largest value `distance` can return (antipodal points)
pub const MAX_DISTANCE_KM: f64 = 180.0 * MILES_PER_DEGREE * KM_PER_MILE;

/// A point on the globe, in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// Great-circle distance in kilometres (spherical law of cosines)
pub fn distance(a: Coordinate, b: Coordinate) -> f64 {
    if a == b {
        return 0.0;
    }

    let lat_a = a.latitude.to_radians();
    let lat_b = b.latitude.to_radians();
    let theta = (a.longitude - b.longitude).to_radians();

    // Rounding can push the cosine slightly outside [-1, 1], where acos is NaN
    let cos_d = (lat_a.sin() * lat_b.sin() + lat_a.cos() * lat_b.cos() * theta.cos()).clamp(-1.0, 1.0);

    let degrees = cos_d.acos().to_degrees();
    degrees * MILES_PER_DEGREE * KM_PER_MILE
}

// =============================================================================
// RESOLVERS
// =============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolverError {
    #[error("no location known for {0}")]
    NotFound(IpAddr),

    #[error("geolocation lookup for {ip} failed: {reason}")]
    Lookup { ip: IpAddr, reason: String },
}

/// Maps an IP address to a coordinate
#[async_trait]
pub trait GeoResolver: Send + Sync {
    async fn resolve(&self, ip: IpAddr) -> Result<Coordinate, ResolverError>;
}

/// Resolver backed by a fixed table
#[derive(Debug, Default, Clone)]
pub struct StaticGeoResolver {
    entries: HashMap<IpAddr, Coordinate>,
}

impl StaticGeoResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_overrides(overrides: &[GeoOverride]) -> Self {
        let entries = overrides
            .iter()
            .map(|o| (o.ip, Coordinate::new(o.latitude, o.longitude)))
            .collect();
        Self { entries }
    }

    pub fn insert(&mut self, ip: IpAddr, coordinate: Coordinate) {
        self.entries.insert(ip, coordinate);
    }

    pub fn with_entry(mut self, ip: IpAddr, coordinate: Coordinate) -> Self {
        self.insert(ip, coordinate);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl GeoResolver for StaticGeoResolver {
    async fn resolve(&self, ip: IpAddr) -> Result<Coordinate, ResolverError> {
        self.entries
            .get(&ip)
            .copied()
            .ok_or(ResolverError::NotFound(ip))
    }
}

/// Tries each resolver in order and returns the first hit
#[derive(Default, Clone)]
pub struct CompositeGeoResolver {
    resolvers: Vec<Arc<dyn GeoResolver>>,
}

impl CompositeGeoResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, resolver: Arc<dyn GeoResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }
}

#[async_trait]
impl GeoResolver for CompositeGeoResolver {
    async fn resolve(&self, ip: IpAddr) -> Result<Coordinate, ResolverError> {
        let mut last_error = ResolverError::NotFound(ip);
        for resolver in &self.resolvers {
            match resolver.resolve(ip).await {
                Ok(coordinate) => return Ok(coordinate),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }
}

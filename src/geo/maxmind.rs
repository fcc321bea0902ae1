//! GeoIP2 / GeoLite2 City database resolver

use async_trait::async_trait;
use maxminddb::{geoip2, MaxMindDBError, Reader};
use std::net::IpAddr;
use std::path::Path;
use tracing::info;

use super::{Coordinate, GeoResolver, ResolverError};

/// Resolver reading a MaxMind City database held in memory
pub struct MaxMindGeoResolver {
    reader: Reader<Vec<u8>>,
}

impl MaxMindGeoResolver {
    /// Open the database file
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let reader = Reader::open_readfile(path)
            .map_err(|e| anyhow::anyhow!("cannot open GeoIP database {:?}: {}", path, e))?;

        info!(
            "🌍 GeoIP database loaded: {} (build {})",
            reader.metadata.database_type, reader.metadata.build_epoch
        );

        Ok(Self { reader })
    }

    fn lookup(&self, ip: IpAddr) -> Result<Coordinate, ResolverError> {
        let city: geoip2::City = self.reader.lookup(ip).map_err(|e| match e {
            MaxMindDBError::AddressNotFoundError(_) => ResolverError::NotFound(ip),
            other => ResolverError::Lookup {
                ip,
                reason: other.to_string(),
            },
        })?;

        let location = city.location.ok_or(ResolverError::NotFound(ip))?;
        match (location.latitude, location.longitude) {
            (Some(latitude), Some(longitude)) => Ok(Coordinate::new(latitude, longitude)),
            _ => Err(ResolverError::NotFound(ip)),
        }
    }
}

#[async_trait]
impl GeoResolver for MaxMindGeoResolver {
    async fn resolve(&self, ip: IpAddr) -> Result<Coordinate, ResolverError> {
        self.lookup(ip)
    }
}

pub mod census;
pub mod crime;
pub mod developments;
pub mod executor;
pub mod geo_profile;
pub mod google_places;
pub mod housing;
pub mod hud_fmr;
pub mod noise;
pub mod overpass;
pub mod registry;
pub mod rentcast;
pub mod schema;
pub mod shared;
pub mod walkscore;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

pub use census::{CensusDemographics, CensusTool};
pub use crime::{CrimeSafetyTool, CrimeStats};
pub use developments::NewDevelopmentsTool;
pub use executor::ToolExecutor;
pub use geo_profile::{GeoProfile, GeoProfileTool, GeocodeZipTool};
pub use google_places::NearbyAmenitiesTool;
pub use housing::{HousingPrices, HousingPricesTool};
pub use hud_fmr::HudFmrTool;
pub use noise::NoiseProxiesTool;
pub use overpass::{OsmAmenitiesTool, OverpassAmenitiesTool};
pub use registry::{Tool, ToolRegistry};
pub use rentcast::{RentcastListingsTool, RentcastMarketTool};
pub use schema::tool_call_schema_json;
pub use shared::{DataSources, GeoPoint, ToolFailure};
pub use walkscore::{WalkScoreTool, WalkScores};

/// Every data-source tool, sharing one HTTP client and memo
pub fn default_registry(sources: Arc<DataSources>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(GeocodeZipTool::new(sources.clone()));
    registry.register(GeoProfileTool::new(sources.clone()));
    registry.register(NearbyAmenitiesTool::new(sources.clone()));
    registry.register(CensusTool::new(sources.clone()));
    registry.register(WalkScoreTool::new(sources.clone()));
    registry.register(HudFmrTool::new(sources.clone()));
    registry.register(RentcastMarketTool::new(sources.clone()));
    registry.register(RentcastListingsTool::new(sources.clone()));
    registry.register(NoiseProxiesTool::new(sources.clone()));
    registry.register(OverpassAmenitiesTool::new(sources.clone()));
    registry.register(OsmAmenitiesTool::new(sources.clone()));
    registry.register(HousingPricesTool::new(sources.clone()));
    registry.register(NewDevelopmentsTool::new(sources.clone()));
    registry.register(CrimeSafetyTool::new(sources));
    registry
}

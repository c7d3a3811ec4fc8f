//! Campaign device and location targeting as a nested lookup

use crate::error::AdsResult;
use crate::flatten::PathConfig;
use crate::query::Query;
use crate::report::{ReportOptions, Reporter, ResponseSource};
use serde_json::{json, Map, Value};

const CRITERION_QUERY: &str = "SELECT campaign_criterion.device.type, campaign_criterion.campaign, \
campaign_criterion.location.geo_target_constant, campaign_criterion.negative, campaign.id \
FROM campaign_criterion \
WHERE campaign_criterion.type IN (LOCATION, DEVICE)";

const GEO_TARGET_QUERY: &str = "SELECT geo_target_constant.resource_name, geo_target_constant.country_code \
FROM geo_target_constant \
WHERE geo_target_constant.resource_name IN {geo_targets}";

const GEO_TARGET_COLUMN: &str = "campaign_criterion_location_geo_target_constant";

/// `{campaign_id}` keyed lookups of targeted (`+`) and excluded (`-`)
/// countries and devices
const TARGET_PATHS: [(&str, &str); 4] = [
    (
        "{campaign_id}.country_code.{geo_target_constant_country_code}.{plus_or_minus}",
        "{plus_or_minus}",
    ),
    ("{campaign_id}.country_codes.{plus_or_minus}", "{geo_target_constant_country_code}"),
    (
        "{campaign_id}.device.{campaign_criterion_device_type}.{plus_or_minus}",
        "{plus_or_minus}",
    ),
    ("{campaign_id}.devices.{plus_or_minus}", "{campaign_criterion_device_type}"),
];

impl<S: ResponseSource> Reporter<S> {
    /// Device and country targeting per campaign.
    ///
    /// ```text
    /// {"7": {"devices": {"+": ["MOBILE"]}, "device": {"MOBILE": {"+": ["+"]}},
    ///        "country_codes": {"-": ["CA"]}, "country_code": {"CA": {"-": ["-"]}}}}
    /// ```
    ///
    /// Location criteria are joined with their geo target constants to learn
    /// the country code. An inaccessible customer yields an empty lookup.
    pub fn campaign_target_info(&self, customer_id: Option<&str>) -> AdsResult<Map<String, Value>> {
        let options = ReportOptions::with_paths(PathConfig::ads_defaults().with_delimiter("_"));
        let mut criteria = self.query_table_with(&Query::new(CRITERION_QUERY), customer_id, &options, None)?;

        let geo_targets: Vec<String> = criteria
            .distinct(GEO_TARGET_COLUMN)
            .into_iter()
            .filter_map(|value| match value {
                Value::String(target) => Some(target),
                _ => None,
            })
            .collect();
        if !geo_targets.is_empty() {
            let mut geo_options = options.clone();
            geo_options.paths.exclude_keys.clear();
            let query = Query::new(GEO_TARGET_QUERY).param("geo_targets", geo_targets);
            let constants = self.query_table_with(&query, customer_id, &geo_options, None)?;
            criteria = criteria.left_join(&constants, GEO_TARGET_COLUMN, "geo_target_constant_resource_name");
        }

        criteria.insert_column("plus_or_minus", |row| {
            let negative = row
                .get("campaign_criterion_negative")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            json!(if negative { "-" } else { "+" })
        });

        Ok(criteria.path_map(&TARGET_PATHS)?)
    }
}

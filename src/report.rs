//! Running queries against a response source and tabulating the rows

use crate::error::{handle_permission_denied, AdsResult};
use crate::flatten::{FieldExtractor, PathConfig, PathFlattener, PathOverride, Table, TableAssembler, ValueExtractor};
use crate::message::FieldListable;
use crate::query::Query;
use anyhow::Result;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

const AD_CONVERSION_ACTION_QUERY: &str = "SELECT customer.id, customer.descriptive_name, customer.currency_code, \
campaign.id, campaign.name, campaign.status, \
campaign.app_campaign_setting.app_id, campaign.app_campaign_setting.app_store, \
ad_group.id, ad_group.name, ad_group.status, ad_group.type, ad_group.base_ad_group, \
ad_group_ad.ad.id, ad_group_ad.ad.name, ad_group_ad.status, ad_group_ad.ad.type, \
metrics.conversions, metrics.conversions_value, \
segments.date, segments.conversion_action, segments.conversion_action_category, segments.conversion_action_name \
FROM ad_group_ad \
WHERE segments.date >= {start_date} AND segments.date <= {end_date}";

const CONVERSION_ACTION_QUERY: &str = "SELECT conversion_action.id, conversion_action.resource_name, \
conversion_action.name, conversion_action.type, conversion_action.category, conversion_action.app_id, \
conversion_action.value_settings.default_value, conversion_action.value_settings.default_currency_code, \
metrics.conversion_last_conversion_date \
FROM conversion_action \
WHERE conversion_action.resource_name IN {conversion_actions}";

/// Where response rows come from
///
/// Authentication, paging and retries all live behind this trait; a search
/// returns every row of the result.
pub trait ResponseSource {
    type Row: FieldListable;

    fn search(&self, customer_id: &str, query: &str) -> AdsResult<Vec<Self::Row>>;
}

/// How response rows become table rows
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReportOptions {
    pub paths: PathConfig,

    /// Replace enum codes with their symbolic names during extraction
    pub substitute_enum_names: bool,

    /// Log progress every this many rows (0 = never)
    pub progress_interval: usize,
}

impl Default for ReportOptions {
    fn default() -> Self {
        ReportOptions {
            paths: PathConfig::ads_defaults(),
            substitute_enum_names: true,
            progress_interval: 100_000,
        }
    }
}

impl ReportOptions {
    pub fn with_paths(paths: PathConfig) -> Self {
        ReportOptions {
            paths,
            ..ReportOptions::default()
        }
    }

    /// Ad reports: app ads drop their `asset`/`text` wrappers and responsive
    /// display ads their `text` wrappers, so the leaf values land directly
    /// under the ad field.
    pub fn ad_report() -> Self {
        let ad = PathOverride::default()
            .nested("app_ad", PathOverride::default().exclude_prefixes(["value", "asset", "text"]))
            .nested("responsive_display_ad", PathOverride::default().exclude_prefixes(["value", "text"]));
        let ad_group_ad = PathOverride::default().nested("ad", ad);
        ReportOptions::with_paths(PathConfig::ads_defaults().with_override("ad_group_ad", ad_group_ad))
    }

    /// Asset reports keep `asset#resource_name`
    pub fn asset_report() -> Self {
        ReportOptions::with_paths(
            PathConfig::ads_defaults().with_override("asset", PathOverride::default().exclude_keys(no_keys())),
        )
    }

    /// Ad asset view reports keep the asset and view resource names and store
    /// the policy summary whole.
    pub fn ad_asset_report() -> Self {
        let view = PathOverride::default()
            .exclude_keys(no_keys())
            .nested("policy_summary", PathOverride::default().max_depth(0));
        ReportOptions::with_paths(
            PathConfig::ads_defaults()
                .with_override("asset", PathOverride::default().exclude_keys(no_keys()))
                .with_override("ad_group_ad_asset_view", view),
        )
    }

    /// Nothing excluded, so joins can use resource names
    pub fn keep_resource_names() -> Self {
        let mut options = ReportOptions::default();
        options.paths.exclude_keys.clear();
        options
    }
}

fn no_keys() -> Vec<String> {
    Vec::new()
}

/// Extract, flatten and collect response rows
pub fn response_to_table<R, I>(
    rows: I,
    options: &ReportOptions,
    value_extractor: Option<&dyn ValueExtractor>,
) -> Result<Table>
where
    R: FieldListable,
    I: IntoIterator<Item = R>,
{
    let mut extractor = FieldExtractor::new(options.substitute_enum_names);
    if let Some(value_extractor) = value_extractor {
        extractor = extractor.with_value_extractor(value_extractor);
    }
    let flattener = PathFlattener::new(options.paths.clone());
    let mut assembler = TableAssembler::new(options.progress_interval);

    info!("Parsing response rows");
    for row in rows {
        let nested = extractor.extract(&row)?;
        assembler.push(flattener.flatten(&nested)?);
    }

    Ok(assembler.finish())
}

/// Runs report queries for a default customer
pub struct Reporter<S: ResponseSource> {
    source: S,
    customer_id: String,
    options: ReportOptions,
}

impl<S: ResponseSource> Reporter<S> {
    pub fn new(source: S, customer_id: impl Into<String>) -> Self {
        Reporter {
            source,
            customer_id: customer_id.into(),
            options: ReportOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ReportOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &ReportOptions {
        &self.options
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Customer queried when none is given
    pub fn customer_id(&self) -> &str {
        &self.customer_id
    }

    /// Run `query` and tabulate the result with the reporter's options.
    /// A permission-denied customer yields an empty table.
    pub fn query_table(&self, query: &Query, customer_id: Option<&str>) -> AdsResult<Table> {
        self.query_table_with(query, customer_id, &self.options, None)
    }

    pub fn query_table_with(
        &self,
        query: &Query,
        customer_id: Option<&str>,
        options: &ReportOptions,
        value_extractor: Option<&dyn ValueExtractor>,
    ) -> AdsResult<Table> {
        let customer_id = customer_id.unwrap_or(&self.customer_id);
        let result = self.run(query, customer_id, options, value_extractor);
        handle_permission_denied(result, Table::new())
    }

    /// Conversions per ad and day, joined with the details of each
    /// conversion action. Empty when no row is segmented by a conversion
    /// action.
    pub fn ad_conversion_action_report(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        customer_id: Option<&str>,
    ) -> AdsResult<Table> {
        let query = Query::new(AD_CONVERSION_ACTION_QUERY)
            .param("start_date", start_date)
            .param("end_date", end_date);
        let ads = self.query_table_with(&query, customer_id, &ReportOptions::default(), None)?;
        if !ads.has_column("segments#conversion_action") {
            return Ok(Table::new());
        }

        let mut actions: Vec<String> = ads
            .distinct("segments#conversion_action")
            .into_iter()
            .filter_map(|value| match value {
                Value::String(action) => Some(action),
                _ => None,
            })
            .collect();
        actions.sort();

        let query = Query::new(CONVERSION_ACTION_QUERY).param("conversion_actions", actions);
        let details = self.query_table_with(&query, customer_id, &ReportOptions::keep_resource_names(), None)?;
        if details.is_empty() {
            return Ok(ads);
        }

        Ok(ads.left_join(&details, "segments#conversion_action", "conversion_action#resource_name"))
    }

    fn run(
        &self,
        query: &Query,
        customer_id: &str,
        options: &ReportOptions,
        value_extractor: Option<&dyn ValueExtractor>,
    ) -> AdsResult<Table> {
        let text = query.render()?;
        debug!(%customer_id, query = %text, "Running search");
        let rows = self.source.search(customer_id, &text)?;
        Ok(response_to_table(rows, options, value_extractor)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AdsError, FieldError, RemoteFailure};
    use crate::message::{EnumBindings, EnumDescriptor, Message};
    use serde_json::{json, Value};
    use std::cell::RefCell;
    use std::sync::Arc;

    struct FakeSource {
        rows: Vec<Value>,
        denied: bool,
        queries: RefCell<Vec<(String, String)>>,
    }

    impl FakeSource {
        fn new(rows: Vec<Value>) -> Self {
            FakeSource {
                rows,
                denied: false,
                queries: RefCell::new(Vec::new()),
            }
        }
    }

    impl ResponseSource for FakeSource {
        type Row = Message;

        fn search(&self, customer_id: &str, query: &str) -> AdsResult<Vec<Message>> {
            self.queries
                .borrow_mut()
                .push((customer_id.to_string(), query.to_string()));
            if self.denied {
                return Err(AdsError::PermissionDenied {
                    request_id: "req-9".to_string(),
                    message: "customer not accessible".to_string(),
                });
            }
            let status = Arc::new(EnumDescriptor::new("CampaignStatus", [(2, "ENABLED"), (3, "PAUSED")]));
            let enums = EnumBindings::new().bind("campaign.status", status);
            Ok(self
                .rows
                .iter()
                .filter_map(|row| Message::from_json(row, &enums))
                .collect())
        }
    }

    fn rows() -> Vec<Value> {
        vec![
            json!({
                "campaign": {
                    "resource_name": "customers/1/campaigns/7",
                    "id": {"value": 7},
                    "status": 2
                },
                "metrics": {"cost_micros": {"value": 1_500_000}}
            }),
            json!({
                "campaign": {
                    "resource_name": "customers/1/campaigns/8",
                    "id": {"value": 8},
                    "status": 3
                },
                "segments": {"device": 2}
            }),
        ]
    }

    #[test]
    fn test_query_table() {
        let reporter = Reporter::new(FakeSource::new(rows()), "1");
        let query = Query::new("SELECT campaign.id FROM campaign WHERE campaign.id = {id}").param("id", 7_i64);

        let table = reporter.query_table(&query, None).unwrap();

        assert_eq!(
            table.columns(),
            ["campaign#id", "campaign#status", "metrics#cost_micros", "segments#device"]
        );
        assert_eq!(table.get(0, "campaign#status"), Some(&json!("ENABLED")));
        assert_eq!(table.get(1, "campaign#status"), Some(&json!("PAUSED")));
        assert_eq!(table.get(1, "metrics#cost_micros"), None);

        let queries = reporter.source().queries.borrow();
        assert_eq!(queries[0].0, "1");
        assert!(queries[0].1.ends_with("campaign.id = '7'"));
    }

    #[test]
    fn test_customer_override_and_options() {
        let options = ReportOptions {
            paths: PathConfig::default().with_delimiter("_"),
            substitute_enum_names: false,
            progress_interval: 1,
        };
        let reporter = Reporter::new(FakeSource::new(rows()), "1").with_options(options);

        let table = reporter.query_table(&Query::new("SELECT campaign.id FROM campaign"), Some("42")).unwrap();

        assert!(table.has_column("campaign_resource_name"));
        assert!(table.has_column("campaign_id_value"));
        assert_eq!(table.get(0, "campaign_status"), Some(&json!(2)));
        assert_eq!(reporter.source().queries.borrow()[0].0, "42");
    }

    #[test]
    fn test_permission_denied_returns_empty_table() {
        let mut source = FakeSource::new(rows());
        source.denied = true;
        let reporter = Reporter::new(source, "1");

        let table = reporter.query_table(&Query::new("SELECT customer.id FROM customer"), None).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn test_remote_failure_propagates() {
        struct Failing;
        impl ResponseSource for Failing {
            type Row = Message;
            fn search(&self, _customer_id: &str, _query: &str) -> AdsResult<Vec<Message>> {
                Err(AdsError::Remote(RemoteFailure {
                    request_id: "req-3".to_string(),
                    status: "INVALID_ARGUMENT".to_string(),
                    errors: vec![FieldError {
                        message: "Unrecognized field".to_string(),
                        field_path: vec!["campaign".to_string(), "nope".to_string()],
                    }],
                }))
            }
        }

        let reporter = Reporter::new(Failing, "1");
        let err = reporter.query_table(&Query::new("SELECT campaign.nope FROM campaign"), None).unwrap_err();
        assert_eq!(err.request_id(), Some("req-3"));
    }

    #[test]
    fn test_missing_parameter_is_not_recovered() {
        let reporter = Reporter::new(FakeSource::new(rows()), "1");
        let err = reporter.query_table(&Query::new("WHERE x = {x}"), None).unwrap_err();
        assert!(matches!(err, AdsError::MissingQueryParameter { .. }));
        assert!(reporter.source().queries.borrow().is_empty());
    }

    #[test]
    fn test_value_extractor_errors_surface_as_extraction() {
        fn reject(_: &crate::flatten::FieldContext<'_>) -> Result<Option<crate::flatten::NestedRecord>> {
            anyhow::bail!("rejected")
        }

        let reporter = Reporter::new(FakeSource::new(rows()), "1");
        let options = reporter.options().clone();
        let err = reporter
            .query_table_with(&Query::new("SELECT campaign.id FROM campaign"), None, &options, Some(&reject as &dyn ValueExtractor))
            .unwrap_err();
        assert!(matches!(err, AdsError::Extraction(_)));
    }

    /// Answers each query with the rows registered for its `FROM` resource
    struct ScriptedSource {
        tables: Vec<(&'static str, Vec<Value>)>,
        queries: RefCell<Vec<String>>,
    }

    impl ScriptedSource {
        fn new(tables: Vec<(&'static str, Vec<Value>)>) -> Self {
            ScriptedSource {
                tables,
                queries: RefCell::new(Vec::new()),
            }
        }
    }

    impl ResponseSource for ScriptedSource {
        type Row = Message;

        fn search(&self, _customer_id: &str, query: &str) -> AdsResult<Vec<Message>> {
            self.queries.borrow_mut().push(query.to_string());
            let rows = self
                .tables
                .iter()
                .find(|(resource, _)| query.contains(&format!("FROM {} ", resource)))
                .map(|(_, rows)| rows.as_slice())
                .unwrap_or_default();
            Ok(rows
                .iter()
                .filter_map(|row| Message::from_json(row, &EnumBindings::new()))
                .collect())
        }
    }

    fn flatten_with(options: &ReportOptions, row: Value) -> Value {
        let message = Message::from_json(&row, &EnumBindings::new()).unwrap();
        let nested = FieldExtractor::new(true).extract(&message).unwrap();
        Value::Object(PathFlattener::new(options.paths.clone()).flatten(&nested).unwrap())
    }

    #[test]
    fn test_ad_report_folds_ad_text_wrappers() {
        let row = json!({
            "ad_group_ad": {
                "ad": {
                    "id": {"value": 5},
                    "app_ad": {
                        "headlines": [{"text": {"value": "Play now"}}, {"text": {"value": "Free"}}],
                        "images": [{"asset": {"value": "customers/1/assets/9"}}]
                    },
                    "responsive_display_ad": {"long_headline": {"text": {"value": "Big"}}}
                }
            }
        });

        assert_eq!(
            flatten_with(&ReportOptions::ad_report(), row.clone()),
            json!({
                "ad_group_ad#ad#id": 5,
                "ad_group_ad#ad#app_ad#headlines": "[\"Play now\",\"Free\"]",
                "ad_group_ad#ad#app_ad#images": "[\"customers/1/assets/9\"]",
                "ad_group_ad#ad#responsive_display_ad#long_headline": "Big"
            })
        );
        assert_eq!(
            flatten_with(&ReportOptions::default(), row)["ad_group_ad#ad#app_ad#headlines"],
            json!("[{\"text\":\"Play now\"},{\"text\":\"Free\"}]")
        );
    }

    #[test]
    fn test_asset_reports_keep_resource_names() {
        let row = json!({
            "campaign": {"resource_name": "customers/1/campaigns/2", "id": {"value": 2}},
            "asset": {"resource_name": "customers/1/assets/9", "id": {"value": 9}},
            "ad_group_ad_asset_view": {
                "resource_name": "customers/1/adGroupAdAssets/3~4~9",
                "policy_summary": {"review_status": 3, "policy_topic_entries": [{"topic": "a"}]}
            }
        });

        assert_eq!(
            flatten_with(&ReportOptions::ad_asset_report(), row.clone()),
            json!({
                "campaign#id": 2,
                "asset#resource_name": "customers/1/assets/9",
                "asset#id": 9,
                "ad_group_ad_asset_view#resource_name": "customers/1/adGroupAdAssets/3~4~9",
                "ad_group_ad_asset_view#policy_summary": "{\"review_status\":3,\"policy_topic_entries\":[{\"topic\":\"a\"}]}"
            })
        );

        let asset = flatten_with(&ReportOptions::asset_report(), row);
        assert_eq!(asset["asset#resource_name"], json!("customers/1/assets/9"));
        assert!(asset.get("ad_group_ad_asset_view#resource_name").is_none());
        assert_eq!(asset["ad_group_ad_asset_view#policy_summary#review_status"], json!(3));
    }

    #[test]
    fn test_ad_conversion_action_report_joins_details() {
        let source = ScriptedSource::new(vec![
            (
                "ad_group_ad",
                vec![
                    json!({"ad_group_ad": {"ad": {"id": {"value": 1}}}, "segments": {"conversion_action": {"value": "customers/1/conversionActions/6"}}}),
                    json!({"ad_group_ad": {"ad": {"id": {"value": 2}}}, "segments": {"conversion_action": {"value": "customers/1/conversionActions/5"}}}),
                    json!({"ad_group_ad": {"ad": {"id": {"value": 3}}}}),
                ],
            ),
            (
                "conversion_action",
                vec![json!({"conversion_action": {"resource_name": "customers/1/conversionActions/5", "name": {"value": "Install"}}})],
            ),
        ]);
        let reporter = Reporter::new(source, "1");
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2020, 1, 31).unwrap();

        let table = reporter.ad_conversion_action_report(start, end, None).unwrap();

        assert_eq!(table.column("ad_group_ad#ad#id").unwrap(), vec![json!(1), json!(2), json!(3)]);
        assert_eq!(
            table.column("conversion_action#name").unwrap(),
            vec![Value::Null, json!("Install"), Value::Null]
        );
        let queries = reporter.source().queries.borrow();
        assert!(queries[0].contains("segments.date >= '2020-01-01' AND segments.date <= '2020-01-31'"));
        assert!(queries[1].ends_with(
            "IN ( 'customers/1/conversionActions/5', 'customers/1/conversionActions/6' )"
        ));
    }

    #[test]
    fn test_ad_conversion_action_report_without_actions_is_empty() {
        let source = ScriptedSource::new(vec![(
            "ad_group_ad",
            vec![json!({"ad_group_ad": {"ad": {"id": {"value": 1}}}})],
        )]);
        let reporter = Reporter::new(source, "1");
        let day = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();

        let table = reporter.ad_conversion_action_report(day, day, None).unwrap();
        assert!(table.is_empty());
        assert_eq!(reporter.source().queries.borrow().len(), 1);
    }
}

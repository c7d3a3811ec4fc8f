//! Query text templating with escaped parameters
//!
//! Queries are written with `{name}` placeholders. Parameters are rendered the
//! way the platform's query language expects literals: dates (and datetimes,
//! truncated to their date) as quoted `YYYY-MM-DD`, lists as parenthesised, comma separated literals, and
//! everything else as single-quoted strings with embedded quotes escaped.
//! `{{` and `}}` produce literal braces.

use crate::error::{AdsError, AdsResult};
use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Text(String),
    Integer(i64),
    List(Vec<QueryParam>),
}

impl QueryParam {
    /// Render as a query literal
    pub fn format(&self) -> String {
        match self {
            QueryParam::List(items) => {
                let items: Vec<String> = items.iter().map(QueryParam::format_item).collect();
                format!("( {} )", items.join(", "))
            }
            other => other.format_item(),
        }
    }

    /// Lists nested inside a list are not expanded again; they are quoted as
    /// a whole.
    fn format_item(&self) -> String {
        match self {
            QueryParam::Date(date) => date_literal(*date),
            QueryParam::DateTime(datetime) => date_literal(datetime.date()),
            QueryParam::Text(text) => quote(text),
            QueryParam::Integer(n) => quote(&n.to_string()),
            QueryParam::List(_) => quote(&self.literal()),
        }
    }

    /// Bracketed list text with quoted strings, e.g. `['a', 2]`
    fn literal(&self) -> String {
        match self {
            QueryParam::Date(date) => date_literal(*date),
            QueryParam::DateTime(datetime) => date_literal(datetime.date()),
            QueryParam::Text(text) => format!("'{}'", text),
            QueryParam::Integer(n) => n.to_string(),
            QueryParam::List(items) => {
                let items: Vec<String> = items.iter().map(QueryParam::literal).collect();
                format!("[{}]", items.join(", "))
            }
        }
    }
}

fn date_literal(date: NaiveDate) -> String {
    format!("'{}'", date.format("%Y-%m-%d"))
}

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "\\'"))
}

impl From<&str> for QueryParam {
    fn from(text: &str) -> Self {
        QueryParam::Text(text.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(text: String) -> Self {
        QueryParam::Text(text)
    }
}

impl From<i64> for QueryParam {
    fn from(n: i64) -> Self {
        QueryParam::Integer(n)
    }
}

impl From<NaiveDate> for QueryParam {
    fn from(date: NaiveDate) -> Self {
        QueryParam::Date(date)
    }
}

impl From<NaiveDateTime> for QueryParam {
    fn from(datetime: NaiveDateTime) -> Self {
        QueryParam::DateTime(datetime)
    }
}

impl<T: Into<QueryParam>> From<Vec<T>> for QueryParam {
    fn from(items: Vec<T>) -> Self {
        QueryParam::List(items.into_iter().map(Into::into).collect())
    }
}

/// A query template and its parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    template: String,
    parameters: BTreeMap<String, QueryParam>,
}

impl Query {
    pub fn new(template: impl Into<String>) -> Self {
        Query {
            template: template.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<QueryParam>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Substitute every placeholder; a placeholder without a parameter is an
    /// error.
    pub fn render(&self) -> AdsResult<String> {
        let mut rendered = String::with_capacity(self.template.len());
        let mut last = 0;

        for captures in PLACEHOLDER.captures_iter(&self.template) {
            let Some(whole) = captures.get(0) else { continue };
            rendered.push_str(&self.template[last..whole.start()]);
            match captures.get(1) {
                Some(name) => {
                    let value = self.parameters.get(name.as_str()).ok_or_else(|| {
                        AdsError::MissingQueryParameter {
                            name: name.as_str().to_string(),
                        }
                    })?;
                    rendered.push_str(&value.format());
                }
                None => rendered.push_str(&whole.as_str()[..1]),
            }
            last = whole.end();
        }

        rendered.push_str(&self.template[last..]);
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_dates_and_lists() {
        let query = Query::new(
            "SELECT campaign.id FROM campaign \
             WHERE segments.date >= {start_date} AND segments.date <= {end_date} \
             AND campaign.resource_name IN {campaigns}",
        )
        .param("start_date", NaiveDate::from_ymd_opt(2019, 6, 11).unwrap())
        .param("end_date", NaiveDate::from_ymd_opt(2019, 6, 17).unwrap())
        .param("campaigns", vec!["customers/1/campaigns/2", "customers/1/campaigns/3"]);

        assert_eq!(
            query.render().unwrap(),
            "SELECT campaign.id FROM campaign \
             WHERE segments.date >= '2019-06-11' AND segments.date <= '2019-06-17' \
             AND campaign.resource_name IN ( 'customers/1/campaigns/2', 'customers/1/campaigns/3' )"
        );
    }

    #[test]
    fn test_render_escapes_quotes() {
        let query = Query::new("WHERE campaign.name = {name} AND customer.id = {id}")
            .param("name", "Bob's Shoes")
            .param("id", 123_i64);
        assert_eq!(
            query.render().unwrap(),
            "WHERE campaign.name = 'Bob\\'s Shoes' AND customer.id = '123'"
        );
    }

    #[test]
    fn test_nested_lists_are_quoted_whole() {
        let param = QueryParam::List(vec![
            QueryParam::Integer(1),
            QueryParam::List(vec![QueryParam::Integer(2), QueryParam::Integer(3)]),
        ]);
        assert_eq!(param.format(), "( '1', '[2, 3]' )");

        let param = QueryParam::from(vec![
            QueryParam::from("a"),
            QueryParam::from(vec![QueryParam::from("b"), QueryParam::Integer(2)]),
        ]);
        assert_eq!(param.format(), "( 'a', '[\\'b\\', 2]' )");
    }

    #[test]
    fn test_datetime_renders_as_date() {
        let start = NaiveDate::from_ymd_opt(2019, 6, 11)
            .unwrap()
            .and_hms_opt(23, 59, 0)
            .unwrap();
        let query = Query::new("WHERE segments.date >= {start}").param("start", start);
        assert_eq!(query.render().unwrap(), "WHERE segments.date >= '2019-06-11'");
        assert_eq!(QueryParam::from(vec![start]).format(), "( '2019-06-11' )");
    }

    #[test]
    fn test_literal_braces() {
        let query = Query::new("{{literal}} {x}").param("x", "y");
        assert_eq!(query.render().unwrap(), "{literal} 'y'");
    }

    #[test]
    fn test_missing_parameter() {
        let err = Query::new("WHERE customer.id = {customer_id}").render().unwrap_err();
        assert!(matches!(
            err,
            AdsError::MissingQueryParameter { ref name } if name == "customer_id"
        ));
    }
}

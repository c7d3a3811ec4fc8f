//! Customer discovery below a manager account
//!
//! A manager links to client customers, which may be managers themselves.
//! Walking the links gives a [`CustomerHierarchy`]; each customer appears at
//! most once even when several managers link to it.

use crate::error::AdsResult;
use crate::flatten::Table;
use crate::query::Query;
use crate::report::{ReportOptions, Reporter, ResponseSource};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

const MANAGER_QUERY: &str = "SELECT customer.manager FROM customer WHERE customer.id = {customer_id}";

const CLIENT_LINK_QUERY: &str =
    "SELECT customer_client_link.client_customer, customer_client_link.status FROM customer_client_link";

const CUSTOMER_CLIENT_QUERY: &str = "SELECT customer_client.level, customer_client.hidden, customer.id, \
customer_client.client_customer FROM customer_client";

/// Client customers by id, each with its own clients
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomerHierarchy {
    pub clients: BTreeMap<String, CustomerHierarchy>,
}

impl CustomerHierarchy {
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Every customer id in the tree, sorted
    pub fn ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        self.collect_ids(&mut ids);
        ids.sort();
        ids
    }

    fn collect_ids(&self, ids: &mut Vec<String>) {
        for (id, clients) in &self.clients {
            ids.push(id.clone());
            clients.collect_ids(ids);
        }
    }

    /// Drop excluded customers together with everything below them
    pub fn prune(&mut self, exclude: &BTreeSet<String>) {
        self.clients.retain(|id, _| !exclude.contains(id));
        for clients in self.clients.values_mut() {
            clients.prune(exclude);
        }
    }
}

/// `123` from `customers/123`
fn customer_id_of(value: &Value) -> Option<String> {
    value
        .as_str()
        .and_then(|resource| resource.split('/').nth(1))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn customer_ids_in(table: &Table, column: &str) -> Vec<String> {
    let mut ids: Vec<String> = table.distinct(column).iter().filter_map(customer_id_of).collect();
    ids.sort();
    ids.dedup();
    ids
}

impl<S: ResponseSource> Reporter<S> {
    /// Whether a customer is a manager account; `None` when the customer
    /// returns no row or is not accessible.
    pub fn is_manager(&self, customer_id: Option<&str>) -> AdsResult<Option<bool>> {
        let customer_id = customer_id.unwrap_or(self.customer_id());
        let query = Query::new(MANAGER_QUERY).param("customer_id", customer_id);
        let table = self.query_table_with(&query, Some(customer_id), &ReportOptions::default(), None)?;

        if table.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            table.get(0, "customer#manager").and_then(Value::as_bool).unwrap_or(false),
        ))
    }

    /// The reporter's customer and every client reachable through client
    /// links, minus `exclude` and whatever sits below an excluded customer.
    pub fn customer_hierarchy(&self, exclude: &[&str]) -> AdsResult<CustomerHierarchy> {
        let root = self.customer_id().to_string();
        let mut seen = BTreeSet::new();
        let mut ancestors = Vec::new();
        let clients = self.client_hierarchy(&root, &mut seen, &mut ancestors)?;

        let mut hierarchy = CustomerHierarchy::default();
        hierarchy.clients.insert(root, clients);
        hierarchy.prune(&exclude.iter().map(|id| id.to_string()).collect());
        Ok(hierarchy)
    }

    /// Sorted customer ids. Without exclusions this is the platform's flat
    /// client list; with exclusions the hierarchy is walked and pruned.
    pub fn customer_ids(&self, exclude: &[&str]) -> AdsResult<Vec<String>> {
        if exclude.is_empty() {
            self.customers()
        } else {
            Ok(self.customer_hierarchy(exclude)?.ids())
        }
    }

    /// Every client customer visible to the reporter's customer, sorted
    pub fn customers(&self) -> AdsResult<Vec<String>> {
        let table = self.query_table_with(&Query::new(CUSTOMER_CLIENT_QUERY), None, &ReportOptions::default(), None)?;
        Ok(customer_ids_in(&table, "customer_client#client_customer"))
    }

    /// Clients below `customer_id`. `seen` is shared by the whole walk: a
    /// client already placed elsewhere in the tree is neither queried nor
    /// placed again. Links back to an ancestor are ignored.
    fn client_hierarchy(
        &self,
        customer_id: &str,
        seen: &mut BTreeSet<String>,
        ancestors: &mut Vec<String>,
    ) -> AdsResult<CustomerHierarchy> {
        let links = self.query_table_with(
            &Query::new(CLIENT_LINK_QUERY),
            Some(customer_id),
            &ReportOptions::default(),
            None,
        )?;
        ancestors.push(customer_id.to_string());
        let client_ids: Vec<String> = customer_ids_in(&links, "customer_client_link#client_customer")
            .into_iter()
            .filter(|id| !ancestors.contains(id))
            .collect();
        debug!(%customer_id, clients = client_ids.len(), "Fetched client links");

        let mut hierarchy = CustomerHierarchy::default();
        for id in &client_ids {
            if seen.contains(id) {
                continue;
            }
            let clients = self.client_hierarchy(id, seen, ancestors)?;
            hierarchy.clients.insert(id.clone(), clients);
        }
        ancestors.pop();

        hierarchy.clients.retain(|id, _| !seen.contains(id));
        seen.extend(client_ids);
        Ok(hierarchy)
    }
}

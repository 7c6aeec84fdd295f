//! Route configuration IR and conversion into envoy-types route tables.

use std::collections::BTreeSet;

use envoy_types::pb::envoy::config::core::v3::{data_source, DataSource};
use envoy_types::pb::envoy::config::route::v3::{
    route::Action, route_action::ClusterSpecifier, route_match::PathSpecifier,
    DirectResponseAction, Route, RouteAction, RouteConfiguration, RouteMatch, VirtualHost,
};
use serde::{Deserialize, Serialize};

/// Route table served over RDS
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub name: String,
    pub virtual_hosts: Vec<VirtualHostConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualHostConfig {
    pub name: String,
    pub domains: Vec<String>,
    pub routes: Vec<RouteRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub name: String,
    pub prefix: String,
    pub action: RouteActionConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RouteActionConfig {
    Cluster { name: String },
    DirectResponse { status: u32, body: String },
}

impl RouteConfig {
    /// Convert to an envoy RouteConfiguration
    pub fn to_envoy_route_configuration(&self) -> Result<RouteConfiguration, crate::Error> {
        if self.name.is_empty() {
            return Err(crate::Error::validation("route configuration name cannot be empty"));
        }

        let virtual_hosts = self
            .virtual_hosts
            .iter()
            .map(VirtualHostConfig::to_envoy_virtual_host)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RouteConfiguration { name: self.name.clone(), virtual_hosts, ..Default::default() })
    }

    /// Names of every cluster the table forwards to.
    pub fn referenced_clusters(&self) -> BTreeSet<&str> {
        self.virtual_hosts
            .iter()
            .flat_map(|vh| vh.routes.iter())
            .filter_map(|rule| match &rule.action {
                RouteActionConfig::Cluster { name } => Some(name.as_str()),
                RouteActionConfig::DirectResponse { .. } => None,
            })
            .collect()
    }
}

impl VirtualHostConfig {
    fn to_envoy_virtual_host(&self) -> Result<VirtualHost, crate::Error> {
        if self.domains.is_empty() {
            return Err(crate::Error::validation(format!(
                "virtual host '{}' must have at least one domain",
                self.name
            )));
        }

        let routes =
            self.routes.iter().map(RouteRule::to_envoy_route).collect::<Result<Vec<_>, _>>()?;

        Ok(VirtualHost {
            name: self.name.clone(),
            domains: self.domains.clone(),
            routes,
            ..Default::default()
        })
    }
}

impl RouteRule {
    fn to_envoy_route(&self) -> Result<Route, crate::Error> {
        let route_match = RouteMatch {
            path_specifier: Some(PathSpecifier::Prefix(self.prefix.clone())),
            ..Default::default()
        };

        let action = match &self.action {
            RouteActionConfig::Cluster { name } => {
                if name.is_empty() {
                    return Err(crate::Error::validation(format!(
                        "route '{}' forwards to an empty cluster name",
                        self.name
                    )));
                }
                Action::Route(RouteAction {
                    cluster_specifier: Some(ClusterSpecifier::Cluster(name.clone())),
                    ..Default::default()
                })
            }
            RouteActionConfig::DirectResponse { status, body } => {
                Action::DirectResponse(DirectResponseAction {
                    status: *status,
                    body: Some(DataSource {
                        specifier: Some(data_source::Specifier::InlineString(body.clone())),
                        ..Default::default()
                    }),
                    ..Default::default()
                })
            }
        };

        Ok(Route {
            name: self.name.clone(),
            r#match: Some(route_match),
            action: Some(action),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteConfig {
        RouteConfig {
            name: "http_routes".to_string(),
            virtual_hosts: vec![
                VirtualHostConfig {
                    name: "vhost_exp_1".to_string(),
                    domains: vec!["web".to_string(), "web.local".to_string()],
                    routes: vec![RouteRule {
                        name: "route_exp_1".to_string(),
                        prefix: "/".to_string(),
                        action: RouteActionConfig::Cluster { name: "cluster_exp_1".to_string() },
                    }],
                },
                VirtualHostConfig {
                    name: "default_backend".to_string(),
                    domains: vec!["*".to_string()],
                    routes: vec![RouteRule {
                        name: "not_found".to_string(),
                        prefix: "/".to_string(),
                        action: RouteActionConfig::DirectResponse {
                            status: 404,
                            body: "No apps exposed\n".to_string(),
                        },
                    }],
                },
            ],
        }
    }

    #[test]
    fn converts_cluster_and_direct_response_routes() {
        let envoy = table().to_envoy_route_configuration().unwrap();
        assert_eq!(envoy.name, "http_routes");
        assert_eq!(envoy.virtual_hosts.len(), 2);

        let forward = &envoy.virtual_hosts[0].routes[0];
        assert_eq!(
            forward.r#match.as_ref().and_then(|m| m.path_specifier.clone()),
            Some(PathSpecifier::Prefix("/".to_string()))
        );
        match &forward.action {
            Some(Action::Route(action)) => assert_eq!(
                action.cluster_specifier,
                Some(ClusterSpecifier::Cluster("cluster_exp_1".to_string()))
            ),
            other => panic!("unexpected action {:?}", other),
        }

        match &envoy.virtual_hosts[1].routes[0].action {
            Some(Action::DirectResponse(direct)) => {
                assert_eq!(direct.status, 404);
                assert_eq!(
                    direct.body.as_ref().and_then(|b| b.specifier.clone()),
                    Some(data_source::Specifier::InlineString("No apps exposed\n".to_string()))
                );
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn referenced_clusters_skip_direct_responses() {
        let table = table();
        let clusters = table.referenced_clusters();
        assert_eq!(clusters.into_iter().collect::<Vec<_>>(), vec!["cluster_exp_1"]);
    }

    #[test]
    fn virtual_host_without_domains_is_rejected() {
        let mut config = table();
        config.virtual_hosts[0].domains.clear();
        assert!(config.to_envoy_route_configuration().is_err());
    }
}

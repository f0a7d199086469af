//! Deployment definition: the subset of `docker-compose.yml` the engine
//! reads.
//!
//! Routing is configured through per-service environment variables:
//! `URL`, `TLS`, `PROTO`, `PORT`, `REDIRECT_FROM` and `REDIRECT_TO`.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::{EngineError, EngineResult};

pub const DEFAULT_PROTO: &str = "http://";
pub const DEFAULT_PORT: &str = "80";

/// Parsed compose file. Services are kept in name order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ComposeFile {
    #[serde(default)]
    pub services: BTreeMap<String, ServiceDef>,
    #[serde(default)]
    pub volumes: BTreeMap<String, Option<VolumeDef>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ServiceDef {
    #[serde(default)]
    pub environment: Environment,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VolumeDef {
    #[serde(default)]
    pub driver: Option<String>,
}

/// Compose accepts both a mapping and a `KEY=VALUE` list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Environment {
    Map(BTreeMap<String, Option<serde_yaml::Value>>),
    List(Vec<String>),
}

impl Default for Environment {
    fn default() -> Self {
        Environment::Map(BTreeMap::new())
    }
}

impl Environment {
    pub fn get(&self, name: &str) -> Option<String> {
        match self {
            Environment::Map(map) => match map.get(name)? {
                Some(serde_yaml::Value::String(s)) => Some(s.clone()),
                Some(serde_yaml::Value::Number(n)) => Some(n.to_string()),
                Some(serde_yaml::Value::Bool(b)) => Some(b.to_string()),
                _ => None,
            },
            Environment::List(items) => items.iter().find_map(|item| {
                let (key, value) = item.split_once('=')?;
                (key == name).then(|| value.to_string())
            }),
        }
    }
}

impl ComposeFile {
    pub fn parse(yaml: &str) -> EngineResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| EngineError::Definition(e.to_string()))
    }

    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// Environment variable `name` of `service`.
    pub fn env(&self, service: &str, name: &str) -> Option<String> {
        self.services.get(service)?.environment.get(name)
    }

    /// Public URL of `service`; `None` means the service is not exposed.
    pub fn url(&self, service: &str) -> Option<String> {
        self.env(service, "URL").filter(|u| !u.trim().is_empty())
    }

    /// `TLS` setting, e.g. `self_signed`.
    pub fn tls(&self, service: &str) -> Option<String> {
        self.env(service, "TLS")
    }

    pub fn proto(&self, service: &str) -> String {
        self.env(service, "PROTO")
            .unwrap_or_else(|| DEFAULT_PROTO.to_string())
    }

    pub fn port(&self, service: &str) -> String {
        self.env(service, "PORT")
            .unwrap_or_else(|| DEFAULT_PORT.to_string())
    }

    /// Host part of this service's own URL.
    pub fn domain(&self, service: &str) -> Option<String> {
        self.url(service).map(|u| domain_of(&u))
    }

    /// Single-token lines of `REDIRECT_FROM`.
    pub fn redirect_from(&self, service: &str) -> Vec<String> {
        redirect_lines(self.env(service, "REDIRECT_FROM"), 1..=1)
    }

    /// Lines of `REDIRECT_TO` with one to three tokens.
    pub fn redirect_to(&self, service: &str) -> Vec<String> {
        redirect_lines(self.env(service, "REDIRECT_TO"), 1..=3)
    }

    /// URLs of every exposed service, in service order.
    pub fn exposed_urls(&self) -> Vec<String> {
        self.service_names().filter_map(|s| self.url(s)).collect()
    }

    /// First exposed service, if any.
    pub fn primary_service(&self) -> Option<&str> {
        self.service_names().find(|s| self.url(s).is_some())
    }

    /// Names (as declared) of volumes backed by `driver`.
    pub fn volumes_with_driver<'a>(&'a self, driver: &'a str) -> impl Iterator<Item = &'a str> {
        self.volumes.iter().filter_map(move |(name, def)| {
            let def = def.as_ref()?;
            (def.driver.as_deref() == Some(driver)).then_some(name.as_str())
        })
    }
}

fn redirect_lines(raw: Option<String>, tokens: std::ops::RangeInclusive<usize>) -> Vec<String> {
    raw.unwrap_or_default()
        .lines()
        .filter(|line| tokens.contains(&line.split_whitespace().count()))
        .map(|line| line.trim().to_string())
        .collect()
}

/// Host of `url` without userinfo or port. Empty for scheme-less input.
pub fn domain_of(url: &str) -> String {
    let Some((_, rest)) = url.split_once("://") else {
        return String::new();
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let host = authority.rsplit('@').next().unwrap_or(authority);
    host.split(':').next().unwrap_or(host).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPOSE: &str = r#"
version: "3"
services:
  web:
    image: shop/web
    environment:
      URL: https://shop.example.com/
      PORT: 8080
      REDIRECT_FROM: |
        www.shop.example.com
        bad line here
      REDIRECT_TO: |
        /old /new 301
        /a b c d
  admin:
    environment:
      - URL=https://admin.example.com:8443
      - TLS=self_signed
  worker:
    image: shop/worker
volumes:
  data:
    driver: btrfs
  cache:
  logs:
    driver: local
"#;

    #[test]
    fn parses_map_and_list_environments() {
        let compose = ComposeFile::parse(COMPOSE).unwrap();
        assert_eq!(compose.port("web"), "8080");
        assert_eq!(compose.tls("admin").as_deref(), Some("self_signed"));
        assert_eq!(compose.proto("web"), DEFAULT_PROTO);
        assert_eq!(compose.port("admin"), DEFAULT_PORT);
        assert_eq!(compose.url("worker"), None);
    }

    #[test]
    fn domain_varies_per_service() {
        let compose = ComposeFile::parse(COMPOSE).unwrap();
        assert_eq!(compose.domain("web").as_deref(), Some("shop.example.com"));
        assert_eq!(compose.domain("admin").as_deref(), Some("admin.example.com"));
        assert_eq!(compose.domain("worker"), None);
    }

    #[test]
    fn redirect_filters() {
        let compose = ComposeFile::parse(COMPOSE).unwrap();
        assert_eq!(compose.redirect_from("web"), vec!["www.shop.example.com"]);
        assert_eq!(compose.redirect_to("web"), vec!["/old /new 301"]);
        assert!(compose.redirect_from("admin").is_empty());
    }

    #[test]
    fn exposed_services_in_name_order() {
        let compose = ComposeFile::parse(COMPOSE).unwrap();
        assert_eq!(compose.primary_service(), Some("admin"));
        assert_eq!(compose.exposed_urls().len(), 2);
    }

    #[test]
    fn only_driver_volumes_are_managed() {
        let compose = ComposeFile::parse(COMPOSE).unwrap();
        let managed: Vec<_> = compose.volumes_with_driver("btrfs").collect();
        assert_eq!(managed, vec!["data"]);
    }

    #[test]
    fn domain_of_strips_port_and_userinfo() {
        assert_eq!(domain_of("https://user@host.example.com:8443/path"), "host.example.com");
        assert_eq!(domain_of("http://host"), "host");
        assert_eq!(domain_of("host.example.com"), "");
    }

    #[test]
    fn invalid_yaml_is_a_definition_error() {
        assert!(matches!(
            ComposeFile::parse("services: [unclosed"),
            Err(EngineError::Definition(_))
        ));
    }
}

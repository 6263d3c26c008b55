//! Known external retail sites and the per-site strategy table.
//!
//! Every piece of site-specific knowledge (where the description lives, how the
//! page has to be fetched, which CSS fixes the rehosted snippet needs) is kept in
//! one [`ServiceProfile`] per [`ExternalService`].

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{RehostError, Result};

/// A supported external retail site.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExternalService {
    EKatalog,
    Comfy,
    Brain,
    Foxtrot,
    Allo,
}

impl ExternalService {
    pub const ALL: [ExternalService; 5] = [
        ExternalService::EKatalog,
        ExternalService::Comfy,
        ExternalService::Brain,
        ExternalService::Foxtrot,
        ExternalService::Allo,
    ];

    /// Look up the strategy record for this service.
    pub fn profile(self) -> &'static ServiceProfile {
        let index = Self::ALL
            .iter()
            .position(|s| *s == self)
            .unwrap_or_default();
        &PROFILES[index]
    }
}

impl fmt::Display for ExternalService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExternalService::EKatalog => "EKatalog",
            ExternalService::Comfy => "Comfy",
            ExternalService::Brain => "Brain",
            ExternalService::Foxtrot => "Foxtrot",
            ExternalService::Allo => "Allo",
        };
        f.write_str(name)
    }
}

impl FromStr for ExternalService {
    type Err = RehostError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|service| service.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| RehostError::Config(format!("Unknown external service: {s}")))
    }
}

/// Content language of the requested page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Language {
    #[default]
    UA,
    RU,
}

impl Language {
    /// URL path segment used by localized sites.
    pub fn url_segment(self) -> &'static str {
        match self {
            Language::UA => "ua/",
            Language::RU => "ru/",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::UA => f.write_str("UA"),
            Language::RU => f.write_str("RU"),
        }
    }
}

/// How a page has to be retrieved before it can be parsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchStrategy {
    /// Plain browsing with the shared HTTP client profile.
    Direct,
    /// The page only renders after client-side script; go through the
    /// headless rendering proxy.
    HeadlessProxy,
}

/// Locates an element inside a fetched document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Locator {
    Id(&'static str),
    Class(&'static str),
}

/// Strategy record for one external service.
#[derive(Debug)]
pub struct ServiceProfile {
    pub service: ExternalService,
    pub host: &'static str,
    /// Tried in order; the first match is the description fragment.
    pub description_locators: &'static [Locator],
    pub fetch_strategy: FetchStrategy,
    /// Site-specific CSS fixes injected after the base stylesheet.
    pub override_css: &'static str,
}

static PROFILES: [ServiceProfile; 5] = [
    ServiceProfile {
        service: ExternalService::EKatalog,
        host: "ek.ua",
        description_locators: &[],
        fetch_strategy: FetchStrategy::Direct,
        override_css: "",
    },
    ServiceProfile {
        service: ExternalService::Comfy,
        host: "comfy.ua",
        description_locators: &[Locator::Id("description")],
        fetch_strategy: FetchStrategy::HeadlessProxy,
        override_css: concat!(
            ".description-block,.description__row{display:flex;flex-wrap:wrap}",
            ".description__item{box-shadow:none;background:none}",
        ),
    },
    ServiceProfile {
        service: ExternalService::Brain,
        host: "brain.com.ua",
        description_locators: &[Locator::Class("product-additional-description")],
        fetch_strategy: FetchStrategy::Direct,
        override_css: concat!(
            ".product-additional-description .row{display:flex;flex-wrap:wrap}",
            ".product-additional-description table{width:100%;border-collapse:collapse}",
        ),
    },
    ServiceProfile {
        service: ExternalService::Foxtrot,
        host: "foxtrot.com.ua",
        description_locators: &[
            Locator::Class("product-about"),
            Locator::Class("product-about__container-for-content"),
        ],
        fetch_strategy: FetchStrategy::Direct,
        override_css: concat!(
            ".product-about__block,.product-about__item{box-shadow:none;background:none}",
            ".product-about__row{display:flex;flex-wrap:wrap}",
        ),
    },
    ServiceProfile {
        service: ExternalService::Allo,
        host: "allo.ua",
        description_locators: &[
            Locator::Class("p-description__content"),
            Locator::Id("extended-description"),
        ],
        fetch_strategy: FetchStrategy::Direct,
        override_css: concat!(
            ".p-description__content .row,.inpage-block{display:flex;flex-wrap:wrap}",
            ".inpage-block__item{box-shadow:none;background:none}",
        ),
    },
];

const EKATALOG_BASE_URL: &str = "https://ek.ua/";

static NON_ASCII_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9\W_]").expect("static regex"));

/// Build the product page URL for a name-based lookup.
///
/// Only EKatalog supports this form; other services are a configuration error.
pub fn product_url(product_name: &str, language: Language, service: ExternalService) -> Result<String> {
    match service {
        ExternalService::EKatalog => Ok(ekatalog_url(product_name, language)),
        other => Err(RehostError::UnsupportedService(other)),
    }
}

fn ekatalog_url(product_name: &str, language: Language) -> String {
    let slug = NON_ASCII_WORD
        .replace_all(product_name, "")
        .trim()
        .replace(' ', "-")
        .to_uppercase();
    format!("{EKATALOG_BASE_URL}{}{slug}.htm", language.url_segment())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_service_has_its_own_profile() {
        for service in ExternalService::ALL {
            assert_eq!(service.profile().service, service);
        }
    }

    #[test]
    fn only_comfy_goes_through_the_proxy() {
        for service in ExternalService::ALL {
            let expected = if service == ExternalService::Comfy {
                FetchStrategy::HeadlessProxy
            } else {
                FetchStrategy::Direct
            };
            assert_eq!(service.profile().fetch_strategy, expected);
        }
    }

    #[test]
    fn ekatalog_url_is_localized_and_upper_cased() {
        let url = product_url("Samsung  Galaxy S24 ", Language::RU, ExternalService::EKatalog).unwrap();
        assert_eq!(url, "https://ek.ua/ru/SAMSUNG--GALAXY-S24.htm");

        let url = product_url("iphone 15", Language::UA, ExternalService::EKatalog).unwrap();
        assert_eq!(url, "https://ek.ua/ua/IPHONE-15.htm");
    }

    #[test]
    fn ekatalog_url_drops_cyrillic_letters() {
        let url = product_url("Bosch пральна WAN28", Language::UA, ExternalService::EKatalog).unwrap();
        assert_eq!(url, "https://ek.ua/ua/BOSCH--WAN28.htm");
    }

    #[test]
    fn product_url_rejects_other_services() {
        let err = product_url("x", Language::UA, ExternalService::Allo).unwrap_err();
        assert!(matches!(err, RehostError::UnsupportedService(ExternalService::Allo)));
    }

    #[test]
    fn service_parses_case_insensitively() {
        assert_eq!("allo".parse::<ExternalService>().unwrap(), ExternalService::Allo);
        assert_eq!(" EKatalog ".parse::<ExternalService>().unwrap(), ExternalService::EKatalog);
        assert!("rozetka".parse::<ExternalService>().is_err());
    }
}

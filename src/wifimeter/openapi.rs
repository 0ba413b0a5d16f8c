use super::handlers::{auth, health, plans, register, usage, wallet};
use utoipa::{
    openapi::{
        security::{Http, HttpAuthScheme, SecurityScheme},
        Contact, InfoBuilder, License,
    },
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        register::register,
        register::list_pending,
        register::approve,
        register::reject,
        auth::login,
        auth::verify_otp,
        auth::verify_token,
        auth::logout,
        wallet::update_wallet,
        plans::list_plans,
        plans::create_plan,
        plans::update_plan,
        plans::delete_plan,
        usage::purchase_plan,
        usage::usage_history,
        usage::log_usage,
        usage::usage_timeline,
        usage::log_usage_for,
    ),
    components(schemas(super::handlers::ErrorBody)),
    modifiers(&CargoInfo, &BearerAuth),
    tags(
        (name = "health", description = "Liveness and build information"),
        (name = "register", description = "Self-registration and provider approval"),
        (name = "auth", description = "Password plus one-time passcode login"),
        (name = "wallet", description = "Wallet address binding"),
        (name = "plans", description = "WiFi plan catalog"),
        (name = "usage", description = "Plan purchase and data usage metering"),
    )
)]
pub struct ApiDoc;

/// Document info from Cargo.toml metadata.
struct CargoInfo;

impl Modify for CargoInfo {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let mut info = InfoBuilder::new()
            .title(env!("CARGO_PKG_NAME"))
            .version(env!("CARGO_PKG_VERSION"))
            .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
            .build();

        info.contact = cargo_contact();
        info.license = cargo_license();

        openapi.info = info;
    }
}

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
    }
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `:` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(':').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    let Some(start) = author.find('<') else {
        let name = author.trim();
        return (Some(name).filter(|name| !name.is_empty()), None);
    };
    let name = author[..start].trim();
    let email = author[start + 1..].trim_end_matches('>').trim();
    (
        Some(name).filter(|name| !name.is_empty()),
        Some(email).filter(|email| !email.is_empty()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_info_from_cargo() {
        let doc = ApiDoc::openapi();
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
        assert_eq!(doc.info.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(
            doc.info.description.as_deref(),
            Some(env!("CARGO_PKG_DESCRIPTION"))
        );

        let contact = doc.info.contact.unwrap();
        assert_eq!(contact.name.as_deref(), Some("Team Wifimeter"));
        assert_eq!(contact.email.as_deref(), Some("team@wifimeter.dev"));

        let license = doc.info.license.unwrap();
        assert_eq!(license.name, "BSD-3-Clause");
        assert_eq!(license.identifier.as_deref(), Some("BSD-3-Clause"));
    }

    #[test]
    fn openapi_documents_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/register",
            "/isp/registrations",
            "/isp/registrations/{id}/approve",
            "/isp/registrations/{id}",
            "/login",
            "/verify-otp",
            "/verify-token",
            "/logout",
            "/update-wallet",
            "/wifi-plans",
            "/wifi-plans/{id}",
            "/purchase-plan",
            "/data-usage",
            "/isp/data-usage",
            "/isp/log-data-usage",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }

        let tags = doc.tags.unwrap_or_default();
        assert!(tags.iter().any(|tag| tag.name == "usage"));

        let components = doc.components.unwrap();
        assert!(components.security_schemes.contains_key("bearer"));
    }

    #[test]
    fn identifiers_are_uuid_strings() {
        let json = serde_json::to_value(ApiDoc::openapi()).unwrap();
        let schemas = &json["components"]["schemas"];
        for (schema, field) in [
            ("Plan", "id"),
            ("Plan", "provider_id"),
            ("PlanPurchase", "identity_id"),
            ("PlanPurchase", "plan_id"),
            ("UsageRecord", "identity_id"),
            ("Principal", "identity_id"),
            ("PurchaseRequest", "plan_id"),
        ] {
            let property = &schemas[schema]["properties"][field];
            assert_eq!(property["type"], "string", "{schema}.{field}");
            assert_eq!(property["format"], "uuid", "{schema}.{field}");
        }
    }

    #[test]
    fn author_parsing() {
        assert_eq!(
            parse_author("Team Wifimeter <team@wifimeter.dev>"),
            (Some("Team Wifimeter"), Some("team@wifimeter.dev"))
        );
        assert_eq!(parse_author("Solo"), (Some("Solo"), None));
        assert_eq!(parse_author("<only@mail>"), (None, Some("only@mail")));
    }
}

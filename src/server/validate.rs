//! Request validation.
//!
//! Checks run in a fixed order (target, resource group, domain, location,
//! size, recipients) and the first failure is returned. Nothing in here
//! touches the cloud.

use super::params::RequestParams;
use crate::errors::{ValidationError, ValidationKind};
use crate::notify::parse_recipients;
use crate::orchestrator::blueprint::{Blueprint, BlueprintKind, INDEX_SIZES};
use crate::orchestrator::context::{
    IndexSize, ProvisioningRequest, SearchOptions, TargetOptions, VmOptions,
};
use regex::Regex;
use std::sync::{Arc, LazyLock};

const DEFAULT_USERNAME: &str = "azureuser";
const DEFAULT_OS_DISK_GB: u32 = 256;
const DEFAULT_APP_PORT: u16 = 3000;

static LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?$").unwrap());

static STORAGE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]{3,24}$").unwrap());

/// Root domains only: `example.com` passes, `sub.example.com` and `example`
/// do not.
pub fn validate_domain(domain: &str) -> Result<(), ValidationError> {
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 || !labels.iter().all(|l| LABEL.is_match(l)) {
        return Err(ValidationError::new(
            ValidationKind::InvalidDomain,
            format!(
                "Domain '{}' is invalid or incomplete. Please enter a valid domain (e.g., 'example.com').",
                domain
            ),
        ));
    }
    if labels.len() > 2 {
        return Err(ValidationError::new(
            ValidationKind::SubdomainNotAllowed,
            format!(
                "Domain '{}' should not contain subdomains. Please enter the root domain only (e.g., 'example.com').",
                domain
            ),
        ));
    }
    Ok(())
}

fn required(params: &RequestParams, field: &str) -> Result<String, ValidationError> {
    params.get(field).ok_or_else(|| ValidationError::missing(field))
}

fn parse_number<T: std::str::FromStr>(
    params: &RequestParams,
    field: &str,
    default: T,
) -> Result<T, ValidationError> {
    match params.get(field) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| {
            ValidationError::new(
                ValidationKind::InvalidParameter,
                format!("Invalid {} '{}'. Expected a positive whole number", field, raw),
            )
        }),
    }
}

/// Build a [`ProvisioningRequest`] for `blueprint` from raw parameters.
pub fn build_request(
    blueprint: Arc<Blueprint>,
    params: &RequestParams,
) -> Result<ProvisioningRequest, ValidationError> {
    let target_name = required(params, &blueprint.target_key)?;
    let resource_group = required(params, "resource_group")?;

    let domain = if blueprint.manages_domain {
        let domain = required(params, "domain")?.to_ascii_lowercase();
        validate_domain(&domain)?;
        Some(domain)
    } else {
        None
    };

    let location = required(params, "location")?;

    let size = match (params.get(&blueprint.size_field), &blueprint.default_size) {
        (Some(size), _) => size,
        (None, Some(default)) => default.clone(),
        (None, None) => return Err(ValidationError::missing(&blueprint.size_field)),
    };
    if !blueprint.is_size_allowed(&size) {
        return Err(ValidationError::new(
            ValidationKind::UnsupportedSize,
            blueprint.unsupported_size_message(&size),
        ));
    }

    let recipients = parse_recipients(&params.get("recipient_emails").unwrap_or_default());
    if recipients.is_empty() {
        return Err(ValidationError::missing("recipient_emails"));
    }

    let options = match blueprint.kind {
        BlueprintKind::AppVm | BlueprintKind::PlainVm => TargetOptions::Vm(vm_options(params)?),
        BlueprintKind::SearchStack => TargetOptions::Search(search_options(&target_name, params)?),
    };

    Ok(ProvisioningRequest {
        blueprint,
        target_name,
        resource_group,
        location,
        size,
        domain,
        recipients,
        webhook_url: params.get("hook_url").unwrap_or_default(),
        options,
    })
}

fn vm_options(params: &RequestParams) -> Result<VmOptions, ValidationError> {
    let os_disk_gb = parse_number(params, "os_disk_gb", DEFAULT_OS_DISK_GB)?;
    let app_port = parse_number(params, "app_port", DEFAULT_APP_PORT)?;
    if os_disk_gb == 0 || app_port == 0 {
        return Err(ValidationError::new(
            ValidationKind::InvalidParameter,
            "os_disk_gb and app_port must be greater than zero",
        ));
    }
    Ok(VmOptions {
        admin_username: params
            .get("username")
            .unwrap_or_else(|| DEFAULT_USERNAME.to_string()),
        admin_password: params.get("password").unwrap_or_else(generate_password),
        os_disk_gb,
        app_image: params.get("app_image").unwrap_or_default(),
        app_port,
    })
}

fn search_options(target: &str, params: &RequestParams) -> Result<SearchOptions, ValidationError> {
    let index_size = match params.get("index_size") {
        None => IndexSize::Medium,
        Some(raw) => IndexSize::parse(&raw).ok_or_else(|| {
            ValidationError::new(
                ValidationKind::InvalidParameter,
                format!(
                    "Invalid index_size '{}'. Supported sizes: {:?}",
                    raw, INDEX_SIZES
                ),
            )
        })?,
    };

    let storage_account = params
        .get("storage_account_name")
        .unwrap_or_else(|| default_storage_name(target));
    if !STORAGE_NAME.is_match(&storage_account) {
        return Err(ValidationError::new(
            ValidationKind::InvalidParameter,
            format!(
                "Invalid storage_account_name '{}'. Use 3-24 lowercase letters and digits",
                storage_account
            ),
        ));
    }

    Ok(SearchOptions {
        index_size,
        storage_account,
        search_service: params
            .get("search_service_name")
            .unwrap_or_else(|| format!("{}-search", target.to_ascii_lowercase())),
    })
}

fn default_storage_name(target: &str) -> String {
    let base: String = target
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .take(19)
        .collect();
    format!("{}store", base)
}

/// Admin password for callers that did not send one. Meets the usual
/// complexity rules: upper, lower, digit and symbol.
fn generate_password() -> String {
    let token = uuid::Uuid::new_v4().simple().to_string();
    format!("Sf!{}Z9", &token[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::blueprint::Blueprint;

    fn app_vm_params(extra: &[(&str, &str)]) -> RequestParams {
        let mut pairs = vec![
            ("vm_name", "web01"),
            ("resource_group", "rg-web"),
            ("domain", "example.com"),
            ("location", "westeurope"),
            ("recipient_emails", "ops@example.com"),
        ];
        pairs.extend_from_slice(extra);
        RequestParams::from_pairs(&pairs)
    }

    #[test]
    fn domain_rules() {
        assert!(validate_domain("example.com").is_ok());
        let sub = validate_domain("sub.example.com").unwrap_err();
        assert_eq!(sub.kind, ValidationKind::SubdomainNotAllowed);
        assert!(sub.message.contains("should not contain subdomains"));

        for bad in ["example", ".example.com", "example.", "exa mple.com"] {
            let err = validate_domain(bad).unwrap_err();
            assert_eq!(err.kind, ValidationKind::InvalidDomain, "{}", bad);
        }
    }

    #[test]
    fn first_failing_check_wins() {
        let err = build_request(
            Arc::new(Blueprint::app_vm()),
            &RequestParams::from_pairs(&[("domain", "bad"), ("location", "westeurope")]),
        )
        .unwrap_err();
        assert_eq!(err.message, "Missing 'vm_name' parameter");

        let err = build_request(
            Arc::new(Blueprint::app_vm()),
            &RequestParams::from_pairs(&[("vm_name", "web01"), ("domain", "bad")]),
        )
        .unwrap_err();
        assert_eq!(err.message, "Missing 'resource_group' parameter");

        let err = build_request(
            Arc::new(Blueprint::app_vm()),
            &RequestParams::from_pairs(&[
                ("vm_name", "web01"),
                ("resource_group", "rg"),
                ("domain", "bad"),
            ]),
        )
        .unwrap_err();
        assert_eq!(err.kind, ValidationKind::InvalidDomain);
    }

    #[test]
    fn app_vm_defaults() {
        let request = build_request(Arc::new(Blueprint::app_vm()), &app_vm_params(&[])).unwrap();
        assert_eq!(request.size, "Standard_D2s_v3");
        assert_eq!(request.domain.as_deref(), Some("example.com"));
        assert!(request.webhook_url.is_empty());
        let vm = request.vm_options().unwrap();
        assert_eq!(vm.admin_username, "azureuser");
        assert_eq!(vm.os_disk_gb, 256);
        assert!(vm.admin_password.len() >= 12);
    }

    #[test]
    fn unsupported_vm_size() {
        let err = build_request(
            Arc::new(Blueprint::app_vm()),
            &app_vm_params(&[("vm_size", "Standard_Z99")]),
        )
        .unwrap_err();
        assert_eq!(err.kind, ValidationKind::UnsupportedSize);
        assert!(err.message.starts_with("VmSize Standard_Z99 is incompatible"));
    }

    #[test]
    fn bad_numbers_are_invalid_parameters() {
        let err = build_request(
            Arc::new(Blueprint::app_vm()),
            &app_vm_params(&[("os_disk_gb", "lots")]),
        )
        .unwrap_err();
        assert_eq!(err.kind, ValidationKind::InvalidParameter);
        assert!(err.message.contains("os_disk_gb"));
    }

    #[test]
    fn recipients_are_required_after_size() {
        let params = RequestParams::from_pairs(&[
            ("vm_name", "box"),
            ("resource_group", "rg"),
            ("location", "westeurope"),
            ("recipient_emails", " , "),
        ]);
        let err = build_request(Arc::new(Blueprint::plain_vm()), &params).unwrap_err();
        assert_eq!(err.kind, ValidationKind::MissingParameter);
        assert_eq!(err.message, "Missing 'recipient_emails' parameter");

        let params = RequestParams::from_pairs(&[
            ("vm_name", "box"),
            ("resource_group", "rg"),
            ("location", "westeurope"),
            ("vm_size", "Standard_Z99"),
        ]);
        let err = build_request(Arc::new(Blueprint::plain_vm()), &params).unwrap_err();
        assert_eq!(err.kind, ValidationKind::UnsupportedSize);
    }

    #[test]
    fn plain_vm_needs_no_domain() {
        let params = RequestParams::from_pairs(&[
            ("vm_name", "box"),
            ("resource_group", "rg"),
            ("location", "westeurope"),
            ("recipient_emails", "a@example.com, b@example.com"),
        ]);
        let request = build_request(Arc::new(Blueprint::plain_vm()), &params).unwrap();
        assert_eq!(request.domain, None);
        assert_eq!(request.recipients.len(), 2);
    }

    #[test]
    fn search_stack_requires_model_type() {
        let base = [
            ("deployment_name", "Docs"),
            ("resource_group", "rg"),
            ("location", "eastus"),
            ("recipient_emails", "ml@example.com"),
        ];
        let err = build_request(
            Arc::new(Blueprint::search_stack()),
            &RequestParams::from_pairs(&base),
        )
        .unwrap_err();
        assert_eq!(err.message, "Missing 'model_type' parameter");

        let mut with_model = base.to_vec();
        with_model.push(("model_type", "gpt-4"));
        let request = build_request(
            Arc::new(Blueprint::search_stack()),
            &RequestParams::from_pairs(&with_model),
        )
        .unwrap();
        let search = request.search_options().unwrap();
        assert_eq!(search.index_size, IndexSize::Medium);
        assert_eq!(search.storage_account, "docsstore");
        assert_eq!(search.search_service, "docs-search");

        with_model.push(("index_size", "huge"));
        let err = build_request(
            Arc::new(Blueprint::search_stack()),
            &RequestParams::from_pairs(&with_model),
        )
        .unwrap_err();
        assert_eq!(err.kind, ValidationKind::InvalidParameter);
        assert!(err.message.contains("Supported sizes"));
    }
}

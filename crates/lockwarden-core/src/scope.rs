//! Scope resolver
//!
//! The only place resource-manager scope strings are taken apart. Every
//! input resolves to exactly one `Scope` variant or a `ScopeParse` error.

use lockwarden_api::Scope;
use lockwarden_util::{GovernanceError, ResourceGroupName, Result};

/// Resolve a scope or resource id string.
///
/// Keywords (`subscriptions`, `resourceGroups`, `providers`) match
/// case-insensitively and a trailing slash is ignored. A resource-group
/// scope with trailing segments but no `providers` segment still resolves
/// to the resource group.
pub fn resolve(input: &str) -> Result<Scope> {
    let fail = |reason: &str| GovernanceError::scope(input, reason);

    let trimmed = input.trim().trim_end_matches('/');
    let path = trimmed
        .strip_prefix('/')
        .ok_or_else(|| fail("scope must start with '/'"))?;
    let segments: Vec<&str> = path.split('/').collect();

    if !segments[0].eq_ignore_ascii_case("subscriptions") {
        return Err(fail("scope must start with /subscriptions"));
    }
    let subscription_id = match segments.get(1) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => return Err(fail("missing subscription id")),
    };
    if segments.len() == 2 {
        return Ok(Scope::Subscription { subscription_id });
    }

    if !segments[2].eq_ignore_ascii_case("resourceGroups") {
        return Err(fail("expected resourceGroups after subscription id"));
    }
    let resource_group = match segments.get(3) {
        Some(rg) if !rg.is_empty() => ResourceGroupName::new(*rg),
        _ => return Err(fail("missing resource group name")),
    };

    let rest = &segments[4..];
    let providers_at = rest
        .iter()
        .position(|s| s.eq_ignore_ascii_case("providers"));
    match providers_at {
        None => Ok(Scope::ResourceGroup {
            subscription_id,
            resource_group,
        }),
        Some(0) => resolve_resource(subscription_id, resource_group, &rest[1..], input),
        Some(_) => Err(fail("unexpected segments before providers")),
    }
}

fn resolve_resource(
    subscription_id: String,
    resource_group: ResourceGroupName,
    segments: &[&str],
    input: &str,
) -> Result<Scope> {
    let fail = |reason: &str| GovernanceError::scope(input, reason);

    let (namespace, pairs) = match segments.split_first() {
        Some((ns, pairs)) if !ns.is_empty() => (*ns, pairs),
        _ => return Err(fail("missing provider namespace")),
    };
    if pairs.is_empty() {
        return Err(fail("missing resource type and name"));
    }
    if pairs.len() % 2 != 0 {
        return Err(fail("resource type without a name"));
    }
    if pairs.iter().any(|s| s.is_empty()) {
        return Err(fail("empty path segment"));
    }
    if pairs.iter().any(|s| s.eq_ignore_ascii_case("providers")) {
        return Err(fail("nested provider segments are not supported"));
    }

    let (parent, leaf) = pairs.split_at(pairs.len() - 2);
    Ok(Scope::Resource {
        subscription_id,
        resource_group,
        provider_namespace: namespace.to_string(),
        parent_path: (!parent.is_empty()).then(|| parent.join("/")),
        resource_type: leaf[0].to_string(),
        resource_name: leaf[1].to_string(),
    })
}

/// Resource group a scope string belongs to, if it resolves below one
pub fn resource_group_of(input: &str) -> Option<ResourceGroupName> {
    resolve(input)
        .ok()
        .and_then(|scope| scope.resource_group_name().cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockwarden_api::ScopeLevel;

    const SUB: &str = "/subscriptions/11111111-2222-3333-4444-555555555555";

    #[test]
    fn resolves_each_level() {
        assert_eq!(resolve(SUB).unwrap().level(), ScopeLevel::Subscription);

        let rg = resolve(&format!("{}/resourceGroups/rg-prod", SUB)).unwrap();
        assert_eq!(rg.level(), ScopeLevel::ResourceGroup);
        assert_eq!(rg.resource_group_name().unwrap().as_str(), "rg-prod");

        let vm = resolve(&format!(
            "{}/resourceGroups/rg-prod/providers/Microsoft.Compute/virtualMachines/vm1",
            SUB
        ))
        .unwrap();
        match vm {
            Scope::Resource {
                provider_namespace,
                parent_path,
                resource_type,
                resource_name,
                ..
            } => {
                assert_eq!(provider_namespace, "Microsoft.Compute");
                assert_eq!(parent_path, None);
                assert_eq!(resource_type, "virtualMachines");
                assert_eq!(resource_name, "vm1");
            }
            other => panic!("expected resource, got {:?}", other),
        }
    }

    #[test]
    fn nested_resources_keep_parent_path() {
        let subnet = resolve(&format!(
            "{}/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet/subnets/default",
            SUB
        ))
        .unwrap();
        assert_eq!(
            subnet.full_resource_type().as_deref(),
            Some("Microsoft.Network/virtualNetworks/subnets")
        );
    }

    #[test]
    fn group_scope_with_malformed_tail_is_still_a_group() {
        let scope = resolve(&format!("{}/resourceGroups/rg-a/whatever/", SUB)).unwrap();
        assert_eq!(scope, Scope::resource_group(&SUB[15..], "rg-a"));
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let scope = resolve("/SUBSCRIPTIONS/s1/resourcegroups/RG/PROVIDERS/ns/type/name").unwrap();
        assert_eq!(scope.level(), ScopeLevel::Resource);
        assert_eq!(scope.subscription_id(), "s1");
    }

    #[test]
    fn unparseable_inputs_are_reported() {
        let bad = [
            "",
            "/",
            "subscriptions/s1",
            "/tenants/t1",
            "/subscriptions",
            "/subscriptions//resourceGroups/rg",
            "/subscriptions/s1/locations/westeurope",
            "/subscriptions/s1/resourceGroups",
            "/subscriptions/s1/resourceGroups/",
            "/subscriptions/s1/resourceGroups/rg/providers",
            "/subscriptions/s1/resourceGroups/rg/providers/ns",
            "/subscriptions/s1/resourceGroups/rg/providers/ns/type",
            "/subscriptions/s1/resourceGroups/rg/extra/providers/ns/type/name",
            "/subscriptions/s1/resourceGroups/rg/providers/ns/t/n/providers/x/y/z",
        ];
        for input in bad {
            match resolve(input) {
                Err(GovernanceError::ScopeParse { scope, .. }) => assert_eq!(scope, input),
                other => panic!("{:?} resolved to {:?}", input, other),
            }
        }
    }

    #[test]
    fn resolving_canonical_form_is_idempotent() {
        let inputs = [
            SUB.to_string(),
            format!("{}/", SUB),
            format!("{}/resourceGroups/rg-a", SUB),
            format!("{}/resourceGroups/rg-a/junk/more", SUB),
            format!("{}/resourceGroups/rg-a/providers/Microsoft.Storage/storageAccounts/st1", SUB),
            format!(
                "{}/resourceGroups/rg-a/providers/Microsoft.Network/virtualNetworks/v/subnets/s",
                SUB
            ),
        ];
        for input in inputs {
            let first = resolve(&input).unwrap();
            let second = resolve(&first.path()).unwrap();
            assert_eq!(first, second, "input {}", input);
            assert_eq!(first.path(), second.path());
        }
    }

    #[test]
    fn resource_group_lookup() {
        assert_eq!(
            resource_group_of(&format!("{}/resourceGroups/RG-X/providers/a/b/c", SUB)),
            Some(ResourceGroupName::new("rg-x"))
        );
        assert_eq!(resource_group_of(SUB), None);
        assert_eq!(resource_group_of("garbage"), None);
    }
}

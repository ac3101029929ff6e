// SPDX-License-Identifier: MIT OR Apache-2.0
//! Flavour tuple to service template resolution.

use pe_core::RuntimeSpecification;
use pe_error::{EngineError, EngineResult, ErrorCode};
use pe_platform::{PlatformGateway, TemplateId};
use tracing::debug;

/// Find the first template whose name equals the specification's tuple key.
///
/// Matching is exact and case-sensitive. A miss is a permanent
/// [`ErrorCode::TemplateNotFound`] failure naming the tuple and flavours.
pub async fn resolve_template(
    gateway: &dyn PlatformGateway,
    spec: &RuntimeSpecification,
) -> EngineResult<TemplateId> {
    let tuple = spec.tuple_key();
    let templates = gateway.list_service_templates().await?;

    if let Some(template) = templates.iter().find(|t| t.name == tuple) {
        debug!(tuple = %tuple, template_id = template.id, "resolved service template");
        return Ok(template.id);
    }

    let faas = &spec.faas.flavour;
    let message = match &spec.daas {
        Some(daas) => format!(
            "No service template named {tuple} matches FaaS flavour {faas} and DaaS flavour {}",
            daas.flavour
        ),
        None => format!("No service template named {tuple} matches FaaS flavour {faas}"),
    };
    let mut err = EngineError::new(ErrorCode::TemplateNotFound, message)
        .with_context("tuple", &tuple)
        .with_context("faas_flavour", faas);
    if let Some(daas) = &spec.daas {
        err = err.with_context("daas_flavour", &daas.flavour);
    }
    Err(err)
}

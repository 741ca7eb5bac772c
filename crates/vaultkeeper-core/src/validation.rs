//! Request and row validation performed before anything is persisted.

use std::collections::HashSet;

use crate::error::ValidationError;
use crate::model::Access;
use crate::share::GrantRequest;

/// Check a single vault or folder grant row.
///
/// `partial` must imply `!can_write`.
pub fn validate_access(
    access: &Access,
    who: impl FnOnce() -> String,
) -> Result<(), ValidationError> {
    if access.partial && access.can_write {
        return Err(ValidationError::PartialWithWrite(who()));
    }
    Ok(())
}

/// Validate a permission change request.
///
/// This performs:
/// - Non-empty check
/// - `partial ⇒ !can_write` on every row
/// - Duplicate principal detection
/// - At least one explicit (non-partial) writer, so the node keeps a
///   write-capable grant after the change
pub fn validate_grant_requests(requests: &[GrantRequest]) -> Result<(), ValidationError> {
    if requests.is_empty() {
        return Err(ValidationError::Empty);
    }

    let mut seen = HashSet::with_capacity(requests.len());
    for request in requests {
        let access = Access {
            can_write: request.can_write,
            partial: request.partial,
        };
        validate_access(&access, || request.principal.to_string())?;

        if !seen.insert(request.principal) {
            return Err(ValidationError::DuplicatePrincipal(
                request.principal.to_string(),
            ));
        }
    }

    if !requests.iter().any(|r| r.can_write && !r.partial) {
        return Err(ValidationError::NoWriter);
    }

    Ok(())
}

/// Check a secret payload against its vault's mandatory fields.
///
/// Payload blocks fill the fields in order: block `i` is field `i`. Every
/// mandatory field needs a non-empty block; extra blocks are free-form.
pub fn validate_mandatory_fields<B: AsRef<[u8]>>(
    fields: &[String],
    blocks: &[B],
) -> Result<(), ValidationError> {
    for (i, field) in fields.iter().enumerate() {
        if blocks.get(i).map_or(true, |b| b.as_ref().is_empty()) {
            return Err(ValidationError::MissingField(field.clone()));
        }
    }
    Ok(())
}

//! Request-scoped types shared by every store.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;

pub const DEFAULT_PAGE_LIMIT: i64 = 20;
pub const MAX_PAGE_LIMIT: i64 = 100;
/// Column width of `payment_reference` on entries and batches.
pub const MAX_REFERENCE_LEN: usize = 255;

/// The authenticated caller, as handed over by the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl Actor {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            ip_address: None,
            user_agent: None,
        }
    }

    pub fn with_client(mut self, ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        self.ip_address = Some(ip_address.into());
        self.user_agent = Some(user_agent.into());
        self
    }
}

/// Offset pagination. Out-of-range values are clamped rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl Pagination {
    pub fn new(page: i64, limit: i64) -> Self {
        Self { page, limit }.normalized()
    }

    pub fn normalized(self) -> Self {
        let page = self.page.max(1);
        let limit = if self.limit <= 0 {
            DEFAULT_PAGE_LIMIT
        } else {
            self.limit.min(MAX_PAGE_LIMIT)
        };
        Self { page, limit }
    }

    pub fn offset(&self) -> i64 {
        let p = self.normalized();
        (p.page - 1).saturating_mul(p.limit)
    }
}

/// One page of results plus the unpaginated match count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, pagination: Pagination) -> Self {
        let p = pagination.normalized();
        Self {
            items,
            total,
            page: p.page,
            limit: p.limit,
        }
    }

    pub fn total_pages(&self) -> i64 {
        if self.total == 0 {
            0
        } else {
            (self.total + self.limit - 1) / self.limit
        }
    }
}

/// Parse an optional `YYYY-MM-DD` query parameter. Blank means "no bound";
/// anything else that fails to parse is a validation error.
pub fn parse_date_param(name: &str, raw: Option<&str>) -> Result<Option<NaiveDate>, AppError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(Some)
            .map_err(|e| {
                AppError::BadRequest(anyhow::anyhow!(
                    "Invalid {} '{}': expected YYYY-MM-DD ({})",
                    name,
                    value,
                    e
                ))
            }),
    }
}

/// Reject a payment reference the `payment_reference` column cannot hold.
pub fn check_payment_reference(reference: &str) -> Result<(), AppError> {
    let len = reference.chars().count();
    if len > MAX_REFERENCE_LEN {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "Payment reference is {} characters; at most {} are allowed",
            len,
            MAX_REFERENCE_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::error::ErrorKind;

    #[test]
    fn pagination_clamps_out_of_range_values() {
        assert_eq!(Pagination::new(0, 0), Pagination { page: 1, limit: 20 });
        assert_eq!(Pagination::new(-3, 500), Pagination { page: 1, limit: 100 });
        assert_eq!(Pagination::new(3, 15), Pagination { page: 3, limit: 15 });
    }

    #[test]
    fn offset_uses_normalized_values() {
        assert_eq!(Pagination::new(3, 15).offset(), 30);
        assert_eq!(Pagination { page: 0, limit: -1 }.offset(), 0);
    }

    #[test]
    fn offset_saturates_for_huge_pages() {
        let p = Pagination {
            page: i64::MAX,
            limit: 20,
        };
        assert_eq!(p.offset(), i64::MAX);
    }

    #[test]
    fn payment_reference_length_is_bounded() {
        assert!(check_payment_reference(&"r".repeat(MAX_REFERENCE_LEN)).is_ok());
        // Counted in characters, as Postgres does for VARCHAR.
        assert!(check_payment_reference(&"é".repeat(MAX_REFERENCE_LEN)).is_ok());

        let err = check_payment_reference(&"r".repeat(MAX_REFERENCE_LEN + 1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn total_pages_rounds_up() {
        let page: Page<u8> = Page::new(vec![], 41, Pagination::new(1, 20));
        assert_eq!(page.total_pages(), 3);
        let empty: Page<u8> = Page::new(vec![], 0, Pagination::default());
        assert_eq!(empty.total_pages(), 0);
    }

    #[test]
    fn blank_date_param_is_no_bound() {
        assert_eq!(parse_date_param("start_date", None).unwrap(), None);
        assert_eq!(parse_date_param("start_date", Some("  ")).unwrap(), None);
    }

    #[test]
    fn malformed_date_param_is_rejected() {
        let err = parse_date_param("start_date", Some("2024-13-45")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("start_date"));
    }

    #[test]
    fn valid_date_param_parses() {
        assert_eq!(
            parse_date_param("end_date", Some("2024-01-05")).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 5)
        );
    }
}

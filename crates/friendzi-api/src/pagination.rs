use serde::Deserialize;

use friendzi_types::api::PageMeta;

pub const MAX_LIMIT: u32 = 100;

/// `?page=&limit=` as sent by clients. Kept as strings so a malformed value
/// falls back to the default instead of failing the request.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// 1-based.
    pub page: u32,
    pub limit: u32,
}

impl PageQuery {
    pub fn resolve(&self, default_limit: u32) -> Page {
        let page = self
            .page
            .as_deref()
            .and_then(|p| p.trim().parse::<u32>().ok())
            .unwrap_or(1)
            .max(1);
        let limit = self
            .limit
            .as_deref()
            .and_then(|l| l.trim().parse::<u32>().ok())
            .unwrap_or(default_limit)
            .clamp(1, MAX_LIMIT);
        Page { page, limit }
    }
}

impl Page {
    pub fn offset(&self) -> u32 {
        (self.page - 1).saturating_mul(self.limit)
    }

    pub fn meta(&self, total_count: i64) -> PageMeta {
        let limit = i64::from(self.limit);
        let total_pages = if total_count <= 0 {
            0
        } else {
            (total_count + limit - 1) / limit
        };
        PageMeta {
            total_count,
            current_page: self.page,
            total_pages,
        }
    }
}

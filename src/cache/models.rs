use serde::{Deserialize, Serialize};

/// The five cache tables. Table and column names come only from this closed
/// set, never from caller input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTable {
    Analysis,
    Query,
    FileContent,
    SessionMemory,
    ApiResponse,
}

impl CacheTable {
    pub const ALL: [CacheTable; 5] = [
        CacheTable::Analysis,
        CacheTable::Query,
        CacheTable::FileContent,
        CacheTable::SessionMemory,
        CacheTable::ApiResponse,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            CacheTable::Analysis => "analysis_cache",
            CacheTable::Query => "query_cache",
            CacheTable::FileContent => "file_content_cache",
            CacheTable::SessionMemory => "session_memory",
            CacheTable::ApiResponse => "api_response_cache",
        }
    }

    /// Column holding the per-entry computation/execution cost, if any.
    pub fn cost_column(&self) -> Option<&'static str> {
        match self {
            CacheTable::Analysis => Some("computation_cost"),
            CacheTable::Query => Some("execution_time_ms"),
            CacheTable::ApiResponse => Some("response_time_ms"),
            CacheTable::FileContent | CacheTable::SessionMemory => None,
        }
    }

    /// Hit rate below which the efficiency report suggests tuning this table.
    pub fn hit_rate_threshold(&self) -> f64 {
        match self {
            CacheTable::Analysis => 0.5,
            CacheTable::Query => 0.3,
            CacheTable::FileContent => 0.4,
            CacheTable::SessionMemory => 0.2,
            CacheTable::ApiResponse => 0.3,
        }
    }
}

/// Lifecycle columns shared by every cache row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryLifecycle {
    /// Unix milliseconds
    pub created_at: i64,
    /// `None` never expires
    pub expires_at: Option<i64>,
    pub hit_count: u64,
    pub last_accessed: Option<i64>,
    pub size_bytes: u64,
}

/// Analysis results we know how to shape, plus an opaque fallback for
/// payloads defined by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisResult {
    Complexity {
        total: u32,
        max: u32,
        functions: u32,
    },
    Dependencies {
        internal: u32,
        external: u32,
    },
    SymbolCount {
        count: u32,
    },
    Opaque {
        bytes: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisCacheEntry {
    pub cache_key: String,
    pub file_path: Option<String>,
    pub analysis_type: String,
    pub result: AnalysisResult,
    /// Seconds it took to compute
    pub computation_cost: f64,
    pub lifecycle: EntryLifecycle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryCacheEntry {
    pub query_hash: String,
    pub query_text: String,
    pub result: String,
    pub execution_time_ms: f64,
    pub lifecycle: EntryLifecycle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileContentCacheEntry {
    pub file_path: String,
    pub checksum: String,
    pub parsed_content: String,
    pub lifecycle: EntryLifecycle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMemoryEntry {
    pub session_id: String,
    pub memory_key: String,
    pub value: String,
    /// How important the memory is; recall orders by it
    pub salience: f64,
    pub lifecycle: EntryLifecycle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponseCacheEntry {
    pub cache_key: String,
    pub endpoint: String,
    pub response: String,
    pub status_code: u16,
    pub response_time_ms: f64,
    pub lifecycle: EntryLifecycle,
}

/// Raw per-table aggregates, as read from the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableStats {
    pub total_entries: u64,
    pub valid_entries: u64,
    pub expired_entries: u64,
    pub size_bytes: u64,
    pub total_hits: u64,
    pub entries_with_hits: u64,
    pub avg_cost: f64,
}

/// Outcome of one maintenance cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub expired: Vec<(CacheTable, usize)>,
    pub compacted: bool,
    pub stats_refreshed: bool,
    /// One message per failed step
    pub errors: Vec<String>,
}

impl MaintenanceReport {
    pub fn total_expired(&self) -> usize {
        self.expired.iter().map(|(_, n)| n).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names_unique() {
        let mut names: Vec<_> = CacheTable::ALL.iter().map(|t| t.table_name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 5);
    }

    #[test]
    fn test_analysis_result_opaque_json() {
        let result = AnalysisResult::Opaque {
            bytes: vec![1, 2, 3],
        };
        let json = serde_json::to_string(&result).unwrap();
        assert_eq!(json, r#"{"type":"opaque","bytes":[1,2,3]}"#);
    }
}

/// Filter and sort options shared by the pokemon and bundle list queries.
///
/// The default is no filtering, newest uploads first.
#[derive(Debug, Clone, Default)]
pub struct Search {
    /// Match records whose generation tag is in this set. For bundles the
    /// set must contain both `min_gen` and `max_gen` (strict, see the
    /// bundle store).
    pub generations: Option<Vec<String>>,
    pub legal_only: bool,
    pub download_code: Option<String>,
    pub sort: Sort,
}

impl Search {
    pub fn by_code(code: &str) -> Self {
        Self {
            download_code: Some(code.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sort {
    pub field: SortField,
    /// `false` (the default) sorts descending.
    pub ascending: bool,
}

impl Sort {
    pub(crate) fn direction(&self) -> &'static str {
        if self.ascending {
            "ASC"
        } else {
            "DESC"
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortField {
    #[default]
    UploadTime,
    DownloadCount,
}

impl SortField {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            Self::UploadTime => "upload_datetime",
            Self::DownloadCount => "download_count",
        }
    }
}

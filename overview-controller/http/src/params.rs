//! Query-string decoding helpers.

use fleet_overview_core::error::ApiError;
use fleet_overview_core::time::{TimeRange, TimeWindow};
use std::collections::HashMap;
use std::str::FromStr;

/// Decoded query parameters; last occurrence of a key wins.
#[derive(Clone, Debug, Default)]
pub struct Params(HashMap<String, String>);

impl Params {
    pub fn parse(query: Option<&str>) -> Self {
        let mut map = HashMap::new();
        if let Some(query) = query {
            for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
                map.insert(key.into_owned(), value.into_owned());
            }
        }
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|s| s.as_str()).filter(|s| !s.is_empty())
    }

    pub fn str_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    pub fn i32_or(&self, key: &str, default: i32) -> Result<i32, ApiError> {
        self.number_or(key, default)
    }

    pub fn i64_or(&self, key: &str, default: i64) -> Result<i64, ApiError> {
        self.number_or(key, default)
    }

    pub fn usize_or(&self, key: &str, default: usize) -> Result<usize, ApiError> {
        self.number_or(key, default)
    }

    fn number_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, ApiError> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw
                .parse()
                .map_err(|_| ApiError::BadRequest(format!("invalid {key}: {raw}"))),
        }
    }

    /// Comma-separated id list; absent or empty means no filter.
    pub fn id_list(&self, key: &str) -> Result<Vec<i32>, ApiError> {
        match self.get(key) {
            None => Ok(Vec::new()),
            Some(raw) => raw
                .split(',')
                .filter(|part| !part.is_empty())
                .map(|part| {
                    part.trim()
                        .parse()
                        .map_err(|_| ApiError::BadRequest(format!("invalid {key}: {raw}")))
                })
                .collect(),
        }
    }

    /// A parsed value for `key`, when present.
    pub fn parsed<T>(&self, key: &str) -> Result<Option<T>, ApiError>
    where
        T: FromStr<Err = ApiError>,
    {
        self.get(key).map(T::from_str).transpose()
    }

    /// Resolves the `timeWindow`/`from`/`to` trio into a range; symbolic
    /// windows win when both are present.
    pub fn time_range(&self, default_window: Option<TimeWindow>) -> Result<TimeRange, ApiError> {
        let window = match self.parsed::<TimeWindow>("timeWindow")? {
            Some(window) => Some(window),
            None if self.get("from").is_none() && self.get("to").is_none() => default_window,
            None => None,
        };
        TimeRange::resolve(window, self.get("from"), self.get("to"))
    }

    /// The window actually used by `time_range`, for previous-period
    /// resolution.
    pub fn effective_window(
        &self,
        default_window: Option<TimeWindow>,
    ) -> Result<Option<TimeWindow>, ApiError> {
        match self.parsed::<TimeWindow>("timeWindow")? {
            Some(window) => Ok(Some(window)),
            None if self.get("from").is_none() && self.get("to").is_none() => Ok(default_window),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_defaults() {
        let params = Params::parse(Some("limit=20&offset=&searchKey=web%20node"));
        assert_eq!(params.i64_or("limit", 10).unwrap(), 20);
        assert_eq!(params.i64_or("offset", 0).unwrap(), 0);
        assert_eq!(params.str_or("searchKey", ""), "web node");
        assert!(params.i64_or("limit", 10).is_ok());
        assert!(Params::parse(Some("limit=ten")).i64_or("limit", 10).is_err());
    }

    #[test]
    fn id_lists_split_on_commas() {
        let params = Params::parse(Some("envIds=1,2,3&clusterIds="));
        assert_eq!(params.id_list("envIds").unwrap(), vec![1, 2, 3]);
        assert!(params.id_list("clusterIds").unwrap().is_empty());
        assert!(Params::parse(Some("envIds=1,x")).id_list("envIds").is_err());
    }

    #[test]
    fn time_range_prefers_symbolic_window() {
        let params = Params::parse(Some("timeWindow=today&from=2024-01-01&to=2024-01-02"));
        let range = params.time_range(None).unwrap();
        assert!(range.to > range.from);

        let explicit = Params::parse(Some("from=2024-01-01&to=2024-01-02"));
        assert!(explicit.time_range(None).is_ok());

        let empty = Params::parse(None);
        assert!(empty.time_range(None).is_err());
        assert!(empty.time_range(Some(TimeWindow::Month)).is_ok());
    }
}

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::task::Task;

/// List ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    /// Newest first.
    #[default]
    CreatedAt,
    /// Title ascending, ignoring case.
    Name,
    /// Incomplete tasks first.
    Status,
}

impl SortKey {
    /// Unknown values fall back to creation order.
    pub fn from_param(value: &str) -> Self {
        match value {
            "name" => Self::Name,
            "status" => Self::Status,
            _ => Self::CreatedAt,
        }
    }

    pub fn as_param(&self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::Name => "name",
            Self::Status => "status",
        }
    }

    pub fn compare(&self, a: &Task, b: &Task) -> Ordering {
        match self {
            Self::CreatedAt => b.created_at.cmp(&a.created_at),
            // Case-folded like the database's default collation; raw bytes break ties
            Self::Name => a
                .title
                .to_lowercase()
                .cmp(&b.title.to_lowercase())
                .then_with(|| a.title.cmp(&b.title)),
            Self::Status => a.is_complete.cmp(&b.is_complete),
        }
    }
}

/// Completion filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFilter {
    #[default]
    All,
    Complete,
    Incomplete,
}

impl StatusFilter {
    /// Unknown values mean no filtering.
    pub fn from_param(value: &str) -> Self {
        match value {
            "complete" => Self::Complete,
            "incomplete" => Self::Incomplete,
            _ => Self::All,
        }
    }

    pub fn as_param(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Complete => "complete",
            Self::Incomplete => "incomplete",
        }
    }

    pub fn accepts(&self, task: &Task) -> bool {
        match self {
            Self::All => true,
            Self::Complete => task.is_complete,
            Self::Incomplete => !task.is_complete,
        }
    }
}

/// The (search, sort, status) tuple that defines one list view.
///
/// Doubles as the cache partition key on the client and as the shape of the
/// list query on the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub search: String,
    pub sort: SortKey,
    pub status: StatusFilter,
}

impl QueryDescriptor {
    pub fn new(search: impl Into<String>, sort: SortKey, status: StatusFilter) -> Self {
        Self {
            search: search.into(),
            sort,
            status,
        }
    }

    pub fn sorted_by(sort: SortKey) -> Self {
        Self {
            sort,
            ..Self::default()
        }
    }

    /// Search is a case-insensitive substring match on the title, like
    /// `ilike '%search%'`.
    pub fn matches(&self, task: &Task) -> bool {
        if !self.status.accepts(task) {
            return false;
        }
        if self.search.is_empty() {
            return true;
        }
        task.title
            .to_lowercase()
            .contains(&self.search.to_lowercase())
    }

    /// Index at which `task` belongs in a sequence already sorted for this
    /// descriptor. Ties go to the head of their run, so with no better
    /// information a new task is prepended.
    pub fn insertion_index(&self, tasks: &[Task], task: &Task) -> usize {
        tasks
            .iter()
            .position(|existing| self.sort.compare(task, existing) != Ordering::Greater)
            .unwrap_or(tasks.len())
    }

    pub fn sort_tasks(&self, tasks: &mut [Task]) {
        tasks.sort_by(|a, b| self.sort.compare(a, b));
    }

    /// Query-string pairs for `GET /tasks`. An empty search is left out.
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(3);
        if !self.search.is_empty() {
            pairs.push(("search", self.search.clone()));
        }
        pairs.push(("sort", self.sort.as_param().to_string()));
        pairs.push(("status", self.status.as_param().to_string()));
        pairs
    }
}

/// Raw query parameters as they arrive over HTTP.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub search: Option<String>,
    pub sort: Option<String>,
    pub status: Option<String>,
}

impl From<ListParams> for QueryDescriptor {
    fn from(params: ListParams) -> Self {
        Self {
            search: params.search.unwrap_or_default(),
            sort: params
                .sort
                .as_deref()
                .map(SortKey::from_param)
                .unwrap_or_default(),
            status: params
                .status
                .as_deref()
                .map(StatusFilter::from_param)
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::fixtures::make_task;

    #[test]
    fn test_unknown_params_fall_back_to_defaults() {
        let params = ListParams {
            search: None,
            sort: Some("bogus".to_string()),
            status: Some("archived".to_string()),
        };
        let descriptor = QueryDescriptor::from(params);
        assert_eq!(descriptor, QueryDescriptor::default());
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let descriptor = QueryDescriptor::new("MILK", SortKey::CreatedAt, StatusFilter::All);
        assert!(descriptor.matches(&make_task("t1", "Buy milk", 100)));
        assert!(!descriptor.matches(&make_task("t2", "Walk dog", 100)));
    }

    #[test]
    fn test_status_filter() {
        let mut done = make_task("t1", "Done", 100);
        done.is_complete = true;
        let open = make_task("t2", "Open", 100);

        let complete = QueryDescriptor::new("", SortKey::CreatedAt, StatusFilter::Complete);
        assert!(complete.matches(&done));
        assert!(!complete.matches(&open));

        let incomplete = QueryDescriptor::new("", SortKey::CreatedAt, StatusFilter::Incomplete);
        assert!(!incomplete.matches(&done));
        assert!(incomplete.matches(&open));
    }

    #[test]
    fn test_insertion_index_by_name() {
        let descriptor = QueryDescriptor::sorted_by(SortKey::Name);
        let tasks = vec![make_task("a", "apple", 100), make_task("c", "cherry", 100)];

        assert_eq!(descriptor.insertion_index(&tasks, &make_task("b", "banana", 100)), 1);
        assert_eq!(descriptor.insertion_index(&tasks, &make_task("z", "zucchini", 100)), 2);
        // Equal titles go in front of their run
        assert_eq!(descriptor.insertion_index(&tasks, &make_task("x", "apple", 100)), 0);
    }

    #[test]
    fn test_name_sort_ignores_case() {
        let descriptor = QueryDescriptor::sorted_by(SortKey::Name);
        let mut tasks = vec![
            make_task("1", "cherry", 100),
            make_task("2", "Banana", 100),
            make_task("3", "apple", 100),
            make_task("4", "banana", 100),
        ];
        descriptor.sort_tasks(&mut tasks);
        let titles: Vec<_> = tasks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["apple", "Banana", "banana", "cherry"]);

        assert_eq!(descriptor.insertion_index(&tasks, &make_task("5", "Avocado", 100)), 1);
    }

    #[test]
    fn test_newest_task_is_prepended_by_default() {
        let descriptor = QueryDescriptor::default();
        let tasks = vec![make_task("b", "b", 200), make_task("a", "a", 100)];
        assert_eq!(descriptor.insertion_index(&tasks, &make_task("c", "c", 300)), 0);
    }

    #[test]
    fn test_query_pairs_skip_empty_search() {
        let pairs = QueryDescriptor::sorted_by(SortKey::Status).to_query_pairs();
        assert_eq!(
            pairs,
            vec![
                ("sort", "status".to_string()),
                ("status", "all".to_string())
            ]
        );
    }
}

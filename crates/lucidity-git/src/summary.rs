use serde::{Deserialize, Serialize};

use crate::parser::GitChangeSet;

/// Summary of diff statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub files_changed: usize,
    pub insertions: usize,
    pub deletions: usize,
}

impl DiffSummary {
    pub fn from_change_set(change_set: &GitChangeSet) -> Self {
        change_set
            .files
            .iter()
            .fold(Self::default(), |acc, file| Self {
                files_changed: acc.files_changed + 1,
                insertions: acc.insertions + file.insertions(),
                deletions: acc.deletions + file.deletions(),
            })
    }

    pub fn is_empty(&self) -> bool {
        self.files_changed == 0
    }
}

impl std::fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} file(s) changed, {} insertion(s), {} deletion(s)",
            self.files_changed, self.insertions, self.deletions
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_unified_diff;

    #[test]
    fn test_summary_counts() {
        let diff = "\
diff --git a/a.rs b/a.rs
--- a/a.rs
+++ b/a.rs
@@ -1,2 +1,2 @@
-one
+uno
 two
diff --git a/b.rs b/b.rs
new file mode 100644
--- /dev/null
+++ b/b.rs
@@ -0,0 +1,2 @@
+x
+y
";
        let summary = DiffSummary::from_change_set(&parse_unified_diff(diff));
        assert_eq!(
            summary,
            DiffSummary {
                files_changed: 2,
                insertions: 3,
                deletions: 1
            }
        );
        assert_eq!(
            summary.to_string(),
            "2 file(s) changed, 3 insertion(s), 1 deletion(s)"
        );
    }

    #[test]
    fn test_empty() {
        assert!(DiffSummary::from_change_set(&GitChangeSet::default()).is_empty());
    }
}

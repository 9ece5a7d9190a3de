use std::sync::OnceLock;

/// The fixed commands every mapper can produce without caller input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalCommand {
    Select,
    SelectById,
    Exists,
    Count,
    Insert,
    Update,
    Delete,
    Copy,
}

impl CanonicalCommand {
    const ALL: usize = 8;

    const fn slot(self) -> usize {
        match self {
            Self::Select => 0,
            Self::SelectById => 1,
            Self::Exists => 2,
            Self::Count => 3,
            Self::Insert => 4,
            Self::Update => 5,
            Self::Delete => 6,
            Self::Copy => 7,
        }
    }
}

/// Write-once slots for canonical command text. Each text is built on first
/// use and the same allocation is returned afterwards.
#[derive(Debug, Default)]
pub(crate) struct CommandCache {
    slots: [OnceLock<String>; CanonicalCommand::ALL],
}

impl CommandCache {
    pub(crate) fn get_or_build(
        &self,
        command: CanonicalCommand,
        build: impl FnOnce() -> String,
    ) -> &str {
        self.slots[command.slot()].get_or_init(build)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_once() {
        let cache = CommandCache::default();
        let mut calls = 0;
        let first = cache.get_or_build(CanonicalCommand::Delete, || {
            calls += 1;
            "DELETE".to_owned()
        });
        let second = cache.get_or_build(CanonicalCommand::Delete, || {
            calls += 1;
            "other".to_owned()
        });
        assert!(std::ptr::eq(first, second));
        assert_eq!(second, "DELETE");
        assert_eq!(calls, 1);
    }
}

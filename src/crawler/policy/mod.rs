//! What a failure at each stage of a capture does to the rest of the tree.


use std::fmt;

/// A step of the capture pipeline that can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Fetching the page the capture was started on
    RootFetch,
    /// Fetching a page reached by following a link
    LinkFetch,
    /// Decoding and parsing a fetched page
    Extraction,
    ImageFetch,
    ImageValidation,
    /// Writing a snapshot and its images
    Persistence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Return the error to whoever started the capture
    Propagate,
    /// Drop this page and its subtree, carry on with siblings
    AbortBranch,
    /// Drop only the failed item
    SkipItem,
    /// Continue with an empty result for the failed fragment
    Degrade,
}

impl Stage {
    #[inline]
    pub const fn policy(self) -> FailurePolicy {
        match self {
            Self::RootFetch | Self::Persistence => FailurePolicy::Propagate,
            Self::LinkFetch => FailurePolicy::AbortBranch,
            Self::Extraction => FailurePolicy::Degrade,
            Self::ImageFetch | Self::ImageValidation => FailurePolicy::SkipItem,
        }
    }

    /// Stage of a page fetch, depending on whether it is the capture root
    #[inline]
    pub const fn page_fetch(is_root: bool) -> Self {
        if is_root {
            Self::RootFetch
        } else {
            Self::LinkFetch
        }
    }
}

impl fmt::Display for Stage {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RootFetch => "root fetch",
            Self::LinkFetch => "link fetch",
            Self::Extraction => "extraction",
            Self::ImageFetch => "image fetch",
            Self::ImageValidation => "image validation",
            Self::Persistence => "persistence",
        };
        f.write_str(name)
    }
}

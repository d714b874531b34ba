//! Nested `#if`/`#elif`/`#else`/`#endif` region tracking.

/// Where a region stands in its branch search.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BranchState {
    /// No branch has tested true yet; a later `#elif`/`#else` may still fire
    Seeking,
    /// The current branch is live and its body is emitted
    Active,
    /// A branch was already taken (or the whole region is skipped); every
    /// remaining branch is dead
    Done,
}

#[derive(Clone, Debug)]
struct Region {
    state: BranchState,
    saw_else: bool,
}

/// Structural misuse of conditional directives. Always fatal; the driver
/// attaches file and line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ConditionalIssue {
    ElifWithoutIf,
    ElifAfterElse,
    ElseWithoutIf,
    ElseAfterElse,
    EndifWithoutIf,
}

impl ConditionalIssue {
    pub(crate) fn describe(self) -> &'static str {
        match self {
            ConditionalIssue::ElifWithoutIf => "#elif without #if",
            ConditionalIssue::ElifAfterElse => "#elif after #else",
            ConditionalIssue::ElseWithoutIf => "#else without #if",
            ConditionalIssue::ElseAfterElse => "#else after #else",
            ConditionalIssue::EndifWithoutIf => "#endif without #if",
        }
    }
}

/// Stack of open conditional regions.
///
/// Each `#if` pushes a region; `#elif`/`#else` rewrite the innermost one;
/// `#endif` pops. Lines are emitted only while every open region is
/// `Active`. Regions opened inside a dead branch start out `Done` so that
/// none of their branches can ever go live.
#[derive(Debug, Default)]
pub(crate) struct ConditionalStack {
    regions: Vec<Region>,
}

impl ConditionalStack {
    pub(crate) fn clear(&mut self) {
        self.regions.clear();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Whether lines reaching the current position are passed through.
    pub(crate) fn emitting(&self) -> bool {
        self.regions.iter().all(|r| r.state == BranchState::Active)
    }

    /// Open a region for `#if`/`#ifdef`/`#ifndef`. `branch` is `None` when
    /// the enclosing context is dead and the condition was never evaluated.
    pub(crate) fn open(&mut self, branch: Option<bool>) {
        let state = match branch {
            Some(true) => BranchState::Active,
            Some(false) => BranchState::Seeking,
            None => BranchState::Done,
        };
        self.regions.push(Region {
            state,
            saw_else: false,
        });
    }

    /// Whether the innermost region still needs its next `#elif` condition
    /// evaluated. False once a branch was taken or the region is dead, so
    /// skipped conditions raise no diagnostics.
    pub(crate) fn wants_condition(&self) -> bool {
        match self.regions.split_last() {
            Some((last, outer)) => {
                last.state == BranchState::Seeking
                    && outer.iter().all(|r| r.state == BranchState::Active)
            }
            None => false,
        }
    }

    /// Apply an `#elif`. `value` is `None` when the condition was not
    /// evaluated (dead branch); it only matters while still `Seeking`.
    pub(crate) fn elif(&mut self, value: Option<bool>) -> Result<(), ConditionalIssue> {
        let Some(region) = self.regions.last_mut() else {
            return Err(ConditionalIssue::ElifWithoutIf);
        };
        if region.saw_else {
            return Err(ConditionalIssue::ElifAfterElse);
        }
        region.state = match region.state {
            BranchState::Seeking if value == Some(true) => BranchState::Active,
            BranchState::Seeking => BranchState::Seeking,
            BranchState::Active | BranchState::Done => BranchState::Done,
        };
        Ok(())
    }

    /// Apply an `#else`: takes the branch iff no earlier branch fired.
    pub(crate) fn else_branch(&mut self) -> Result<(), ConditionalIssue> {
        let Some(region) = self.regions.last_mut() else {
            return Err(ConditionalIssue::ElseWithoutIf);
        };
        if region.saw_else {
            return Err(ConditionalIssue::ElseAfterElse);
        }
        region.saw_else = true;
        region.state = match region.state {
            BranchState::Seeking => BranchState::Active,
            BranchState::Active | BranchState::Done => BranchState::Done,
        };
        Ok(())
    }

    /// Close the innermost region on `#endif`.
    pub(crate) fn close(&mut self) -> Result<(), ConditionalIssue> {
        match self.regions.pop() {
            Some(_) => Ok(()),
            None => Err(ConditionalIssue::EndifWithoutIf),
        }
    }
}

//! Fixed status workflow: the default
//! forward action for each status, the
//! step back, and the button label.

use crate::task::Status;

/// Status the default action moves a
/// task to. `None` means no default
/// action is available.
#[must_use]
pub fn next_status(
  status: Status
) -> Option<Status> {
  match status {
    | Status::Inbox => {
      Some(Status::Brainstorm)
    }
    | Status::Proposed
    | Status::Backlog => {
      Some(Status::Todo)
    }
    | Status::Maybe => {
      Some(Status::Backlog)
    }
    | Status::Todo
    | Status::OnHold => {
      Some(Status::InProgress)
    }
    | Status::InProgress => {
      Some(Status::Done)
    }
    | Status::Done => {
      Some(Status::Reviewed)
    }
    | Status::Brainstorm
    | Status::Reviewed
    | Status::Archived => None
  }
}

#[must_use]
pub fn previous_status(
  status: Status
) -> Option<Status> {
  match status {
    | Status::Brainstorm => {
      Some(Status::Inbox)
    }
    | Status::Backlog => {
      Some(Status::Maybe)
    }
    | Status::Todo => {
      Some(Status::Backlog)
    }
    | Status::InProgress => {
      Some(Status::Todo)
    }
    | Status::Done => {
      Some(Status::InProgress)
    }
    | Status::Reviewed => {
      Some(Status::Done)
    }
    | Status::Inbox
    | Status::Proposed
    | Status::Maybe
    | Status::OnHold
    | Status::Archived => None
  }
}

#[must_use]
pub fn action_label(
  status: Status
) -> &'static str {
  match status {
    | Status::Inbox => "Brainstorm",
    | Status::Brainstorm => "Refine",
    | Status::Proposed => "Approve",
    | Status::Backlog => "Move to Todo",
    | Status::Maybe => {
      "Move to Backlog"
    }
    | Status::Todo => "Start",
    | Status::InProgress => "Complete",
    | Status::OnHold => "Resume",
    | Status::Done => "Review",
    | Status::Reviewed => "Archive",
    | Status::Archived => "Reopen"
  }
}

/// Archiving is an explicit action,
/// only offered once work is finished.
#[must_use]
pub fn can_archive(
  status: Status
) -> bool {
  status.is_completed()
}

/// Reopen is the one edge that points
/// back into open work.
#[must_use]
pub fn can_reopen(
  status: Status
) -> bool {
  matches!(
    status,
    Status::Done
      | Status::Reviewed
      | Status::Archived
  )
}

pub const REOPEN_STATUS: Status =
  Status::Todo;

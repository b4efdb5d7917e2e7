use super::repo_types::Account;

/// Capabilities checked against an account's flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ViewOwnProfile,
    EditOwnProfile,
    AccessAdmin,
    ViewAccounts,
    ManageAccounts,
}

/// Inactive accounts can do nothing; active superusers can do everything.
pub fn has_permission(account: &Account, action: Action) -> bool {
    if !account.is_active {
        return false;
    }
    if account.is_superuser {
        return true;
    }
    match action {
        Action::ViewOwnProfile | Action::EditOwnProfile => true,
        Action::AccessAdmin | Action::ViewAccounts => account.is_staff,
        Action::ManageAccounts => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::repo_types::AccountFields;
    use time::OffsetDateTime;

    const ALL: [Action; 5] = [
        Action::ViewOwnProfile,
        Action::EditOwnProfile,
        Action::AccessAdmin,
        Action::ViewAccounts,
        Action::ManageAccounts,
    ];

    fn account(active: bool, staff: bool, superuser: bool) -> Account {
        Account::new(
            "x@example.com".into(),
            AccountFields {
                is_active: Some(active),
                is_staff: Some(staff),
                is_superuser: Some(superuser),
                ..AccountFields::named("X")
            },
            OffsetDateTime::UNIX_EPOCH,
        )
    }

    #[test]
    fn inactive_has_nothing() {
        let acc = account(false, true, true);
        assert!(ALL.iter().all(|a| !has_permission(&acc, *a)));
    }

    #[test]
    fn superuser_has_everything() {
        let acc = account(true, false, true);
        assert!(ALL.iter().all(|a| has_permission(&acc, *a)));
    }

    #[test]
    fn staff_can_view_but_not_manage() {
        let acc = account(true, true, false);
        assert!(has_permission(&acc, Action::AccessAdmin));
        assert!(has_permission(&acc, Action::ViewAccounts));
        assert!(!has_permission(&acc, Action::ManageAccounts));
    }

    #[test]
    fn regular_user_owns_profile_only() {
        let acc = account(true, false, false);
        assert!(has_permission(&acc, Action::ViewOwnProfile));
        assert!(has_permission(&acc, Action::EditOwnProfile));
        assert!(!has_permission(&acc, Action::ViewAccounts));
        assert!(!has_permission(&acc, Action::AccessAdmin));
    }
}

/// Role ids as issued in access tokens.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Role {
    Admin = 1,
    Hr = 2,
    Employee = 3,
    System = 4,
    ApiUser = 5,
}

impl TryFrom<u8> for Role {
    type Error = u8;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            1 => Ok(Role::Admin),
            2 => Ok(Role::Hr),
            3 => Ok(Role::Employee),
            4 => Ok(Role::System),
            5 => Ok(Role::ApiUser),
            other => Err(other),
        }
    }
}

impl Role {
    /// Roles allowed to manage mappings, schedules and corrections.
    pub fn manages_attendance(self) -> bool {
        matches!(self, Role::Admin | Role::Hr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_and_unknown_ids_are_rejected() {
        assert_eq!(Role::try_from(2), Ok(Role::Hr));
        assert_eq!(Role::try_from(Role::ApiUser as u8), Ok(Role::ApiUser));
        assert_eq!(Role::try_from(9), Err(9));
        assert!(Role::Admin.manages_attendance());
        assert!(!Role::System.manages_attendance());
    }
}

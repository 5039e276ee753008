//! Owner credentials for spawning a child as another user (unix only)

use nix::unistd::{Uid, User};

use crate::error::{ProcessError, Result};

/// User identity a child is started under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    name: String,
    uid: u32,
    gid: u32,
}

impl Owner {
    /// Look up a user account by name
    pub fn from_name(name: &str) -> Result<Self> {
        let user = User::from_name(name)
            .map_err(|errno| ProcessError::io(format!("looking up user {name}"), errno.into()))?
            .ok_or_else(|| ProcessError::InvalidConfig(format!("unknown user: {name}")))?;
        Ok(Self::from(user))
    }

    /// Owner from known ids, no lookup performed
    pub fn from_ids(name: impl Into<String>, uid: u32, gid: u32) -> Self {
        Self {
            name: name.into(),
            uid,
            gid,
        }
    }

    /// The user this process runs as
    pub fn current() -> Result<Self> {
        let uid = Uid::current();
        let user = User::from_uid(uid)
            .map_err(|errno| ProcessError::io("looking up current user", errno.into()))?
            .ok_or_else(|| ProcessError::InvalidConfig(format!("no passwd entry for uid {uid}")))?;
        Ok(Self::from(user))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }
}

impl From<User> for Owner {
    fn from(user: User) -> Self {
        Self {
            name: user.name,
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_user_is_config_error() {
        let err = Owner::from_name("procpipe-no-such-user").unwrap_err();
        assert!(matches!(err, ProcessError::InvalidConfig(_)));
    }

    #[test]
    fn test_root_lookup() {
        let root = Owner::from_name("root").unwrap();
        assert_eq!(root.uid(), 0);
        assert_eq!(root.name(), "root");
    }

    #[test]
    fn test_current_matches_uid() {
        let me = Owner::current().unwrap();
        assert_eq!(me.uid(), Uid::current().as_raw());
    }
}

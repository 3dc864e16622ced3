// Copyright 2025 HEM Sp. z o.o.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Session lifecycle. At most one session exists at a time; its id is chosen
//! by the host in OpenSession.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Closed,
    Open {
        id: u32,
    },
}

impl SessionState {
    pub fn is_open(&self) -> bool {
        matches!(self, SessionState::Open { .. })
    }

    /// Opens a session; if one is already open its id is returned as the
    /// error so the caller can report it to the host.
    pub fn open(&mut self, id: u32) -> Result<(), u32> {
        match *self {
            SessionState::Closed => {
                *self = SessionState::Open { id };
                Ok(())
            }
            SessionState::Open { id: existing } => Err(existing),
        }
    }

    pub fn close(&mut self) {
        *self = SessionState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_close_cycle() {
        let mut session = SessionState::default();
        assert!(!session.is_open());
        assert_eq!(session.open(7), Ok(()));
        assert!(session.is_open());
        session.close();
        assert!(!session.is_open());
        assert_eq!(session.open(8), Ok(()));
    }

    #[test]
    fn second_open_reports_existing_id() {
        let mut session = SessionState::default();
        session.open(42).unwrap();
        assert_eq!(session.open(43), Err(42));
        assert_eq!(session, SessionState::Open { id: 42 });
    }
}

// Copyright 2016 Pierre-Étienne Meunier
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
//! SFTP version 3 (draft-ietf-secsh-filexfer-02) over a `russh`
//! channel: [`protocol`] is the wire codec, [`client::SftpSession`]
//! drives a client-side request/response engine, and [`server::run`]
//! dispatches server-side requests to a user-provided
//! [`server::SftpHandler`].
#[macro_use]
extern crate log;

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use error::Error;
pub use protocol::{DirEntry, FileAttributes, OpenFlags, StatusCode};

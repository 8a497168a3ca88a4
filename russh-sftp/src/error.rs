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
use crate::protocol::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Channel(#[from] russh::Error),
    #[error("Malformed SFTP packet")]
    Decode,
    #[error("Unexpected SFTP message type {0}")]
    UnexpectedMessage(u8),
    #[error("Version mismatch: server offered {0}, only version 3 is supported")]
    UnsupportedVersion(u32),
    #[error("Request id {0} has no matching reply")]
    UnknownRequestId(u32),
    #[error("The SFTP channel closed before a reply arrived")]
    ChannelClosed,
    #[error("Remote SFTP operation failed: {0:?}")]
    Remote(StatusCode),
}

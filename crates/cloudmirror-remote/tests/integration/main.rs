//! Integration tests for cloudmirror-remote
//!
//! Uses wiremock to simulate the remote sync service and verifies
//! end-to-end behavior of the RemoteClient and the IRemoteService adapter.

mod common;

mod test_download;
mod test_sync_from;
mod test_sync_to;

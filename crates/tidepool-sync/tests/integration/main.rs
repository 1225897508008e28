mod common;
mod test_auto_sync;
mod test_pull;
mod test_sync_pass;

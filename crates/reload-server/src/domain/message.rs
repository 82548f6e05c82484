//! The one control message this server ever sends.

/// Text frame that tells the browser-side script to reload the page.
///
/// This is the only wire message in the protocol.  Browsers never send
/// anything meaningful back.
pub const RELOAD_MESSAGE: &str = "reload";

//! Application property vocabulary shared by both sides of the protocol.

/// `op` key. Value is one of the operation names below.
pub const OP: &str = "op";

/// `path` key. Slash-separated route of the request.
pub const PATH: &str = "path";

/// `mutex_name` key. Names the lock an acquire request targets.
pub const MUTEX_NAME: &str = "mutex_name";

/// `wait_time` key. Milliseconds a queued acquire is willing to wait.
pub const WAIT_TIME: &str = "wait_time";

/// `label` key. Free-form diagnostic label attached to an acquire.
pub const LABEL: &str = "label";

/// `status` key on responses.
pub const STATUS: &str = "status";

/// `status_description` key on responses.
pub const STATUS_DESCRIPTION: &str = "status_description";

/// `acquisition_id` key on a successful acquire response.
pub const ACQUISITION_ID: &str = "acquisition_id";

/// GET operation
pub const GET: &str = "GET";

/// PUT operation
pub const PUT: &str = "PUT";

/// POST operation
pub const POST: &str = "POST";

/// DELETE operation
pub const DELETE: &str = "DELETE";

/// acquire operation
pub const ACQUIRE: &str = "acquire";

/// Status code of a successful request or grant.
pub const STATUS_OK: u16 = 200;

/// Status code when a path exists but the verb has no handler.
pub const STATUS_NOT_PERMITTED: u16 = 400;

/// Status code when no route matches the request path.
pub const STATUS_NOT_FOUND: u16 = 404;

/// Status code when a queued acquire outlives its `wait_time`.
pub const STATUS_WAIT_TIMEOUT: u16 = 408;

/// Status code notifying a holder that the server dropped its lock.
pub const STATUS_DROPPED: u16 = 410;

/// Description paired with [`STATUS_OK`].
pub const DESCRIPTION_OK: &str = "OK";

/// Description paired with [`STATUS_NOT_PERMITTED`].
pub const DESCRIPTION_NOT_PERMITTED: &str = "Not Permitted";

/// Description paired with [`STATUS_NOT_FOUND`].
pub const DESCRIPTION_NOT_FOUND: &str = "No resource found at path";

/// Description paired with [`STATUS_WAIT_TIMEOUT`].
pub const DESCRIPTION_WAIT_TIMEOUT: &str = "Timed out waiting for the mutex";

/// Description paired with [`STATUS_DROPPED`].
pub const DESCRIPTION_DROPPED: &str = "Mutex was dropped prematurely";

/// Returns the canonical description for a status code, or an empty
/// string for codes this protocol does not emit itself.
pub fn default_description(status: u16) -> &'static str {
    match status {
        STATUS_OK => DESCRIPTION_OK,
        STATUS_NOT_PERMITTED => DESCRIPTION_NOT_PERMITTED,
        STATUS_NOT_FOUND => DESCRIPTION_NOT_FOUND,
        STATUS_WAIT_TIMEOUT => DESCRIPTION_WAIT_TIMEOUT,
        STATUS_DROPPED => DESCRIPTION_DROPPED,
        _ => "",
    }
}

//! Turning handler panics into `500` responses.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::sync::{Arc, Once};

use axum::http::StatusCode;
use axum::response::Response;
use bytes::Bytes;
use restkit_axum_core::{APPLICATION_JSON, ApiError, JsonEncoder};

use crate::reply::Reply;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

static INSTALL_HOOK: Once = Once::new();

thread_local! {
    static PANIC_BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

/// Install a process wide panic hook that records the backtrace of the
/// panicking thread before unwinding starts. The previous hook still runs.
pub(crate) fn install_panic_hook() {
    INSTALL_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let _ = PANIC_BACKTRACE.try_with(|slot| {
                if let Ok(mut slot) = slot.try_borrow_mut() {
                    *slot = Some(Backtrace::force_capture());
                }
            });
            previous(info);
        }));
    });
}

/// Backtrace recorded by the hook for the last panic on this thread.
fn take_backtrace() -> Backtrace {
    PANIC_BACKTRACE
        .with(|slot| slot.borrow_mut().take())
        .unwrap_or_else(Backtrace::force_capture)
}

/// Build the response for a panic caught while serving a request.
///
/// The panic is logged at error level with `critical = true` and the
/// backtrace taken where the panic happened, and each frame again at debug
/// level. If the request already has
/// a written response it is kept. Otherwise the response is a `500`: in debug
/// mode a plain text report with the panic message and backtrace, else the
/// generic structured error encoded with the request's encoder (JSON when
/// negotiation had not happened yet).
pub(crate) fn recover(
    panic: Box<dyn Any + Send>,
    reply: Option<&Reply>,
    debug: bool,
) -> Response {
    let cause = panic_message(&*panic);
    let backtrace = take_backtrace().to_string();

    tracing::error!(
        critical = true,
        panic = %cause,
        backtrace = %backtrace,
        "handler panicked"
    );
    for frame in backtrace.lines() {
        tracing::debug!(panic = %cause, "{frame}");
    }

    let fresh;
    let reply = match reply {
        Some(reply) => reply,
        None => {
            fresh = Reply::new(Arc::new(JsonEncoder), APPLICATION_JSON, debug);
            &fresh
        }
    };

    if reply.is_written() {
        tracing::debug!("response already written before the panic, keeping it");
    } else if debug {
        let report = format!("panic: {cause}\n\n{backtrace}");
        reply.send_raw(
            StatusCode::INTERNAL_SERVER_ERROR,
            TEXT_PLAIN,
            Bytes::from(report),
        );
    } else {
        reply.send_error(&ApiError::new(StatusCode::INTERNAL_SERVER_ERROR));
    }
    reply.finish()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;
    use http_body_util::BodyExt;
    use restkit_axum_core::XmlEncoder;

    async fn body_string(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(&*payload), "static str");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(&*payload), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(&*payload), "unknown panic payload");
    }

    #[tokio::test]
    async fn test_generic_error_without_reply() {
        let response = recover(Box::new("boom"), None, false);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[header::CONTENT_TYPE], APPLICATION_JSON);
        assert_eq!(
            body_string(response).await,
            r#"{"status_code":500,"msg":"Internal Server Error"}"#
        );
    }

    #[tokio::test]
    async fn test_generic_error_uses_negotiated_encoder() {
        let reply = Reply::new(Arc::new(XmlEncoder), "application/xml", false);
        let response = recover(Box::new("boom"), Some(&reply), false);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/xml");
        assert_eq!(
            body_string(response).await,
            "<Error><status_code>500</status_code><msg>Internal Server Error</msg></Error>"
        );
    }

    #[tokio::test]
    async fn test_debug_report_is_plain_text() {
        let reply = Reply::new(Arc::new(JsonEncoder), APPLICATION_JSON, true);
        let payload = Box::new(String::from("index out of bounds"));
        let response = recover(payload, Some(&reply), true);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[header::CONTENT_TYPE], TEXT_PLAIN);
        assert!(body_string(response).await.starts_with("panic: index out of bounds\n\n"));
    }

    #[inline(never)]
    fn overflow_in_ledger() {
        panic!("ledger overflow");
    }

    #[tokio::test]
    async fn test_backtrace_is_taken_at_the_panic_site() {
        install_panic_hook();
        let payload = std::panic::catch_unwind(overflow_in_ledger).unwrap_err();
        let reply = Reply::new(Arc::new(JsonEncoder), APPLICATION_JSON, true);
        let body = body_string(recover(payload, Some(&reply), true)).await;
        assert!(body.starts_with("panic: ledger overflow\n\n"));
        assert!(body.contains("overflow_in_ledger"));
    }

    #[test]
    fn test_recorded_backtrace_is_taken_once() {
        install_panic_hook();
        let _ = std::panic::catch_unwind(overflow_in_ledger);
        assert!(PANIC_BACKTRACE.with(|slot| slot.borrow().is_some()));
        let _ = take_backtrace();
        assert!(PANIC_BACKTRACE.with(|slot| slot.borrow().is_none()));
    }

    #[tokio::test]
    async fn test_written_response_is_kept() {
        let reply = Reply::new(Arc::new(JsonEncoder), APPLICATION_JSON, false);
        reply.encode(&"partial").unwrap();
        let response = recover(Box::new("late panic"), Some(&reply), false);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, r#""partial""#);
    }
}

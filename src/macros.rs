/// Build an `Error::Internal` from a format string
macro_rules! se {
    ($($arg:tt)*) => {{
        $crate::error::Error::Internal(format!($($arg)*))
    }};
}

/// Shorthand for the handful of response shapes the service returns
macro_rules! resp {
    (html => $body:expr) => {{
        tide::Response::builder(200)
            .content_type(tide::http::mime::HTML)
            .body($body)
            .build()
    }};
    (status => $status:expr, html => $body:expr) => {{
        tide::Response::builder($status)
            .content_type(tide::http::mime::HTML)
            .body($body)
            .build()
    }};
    (redirect => $to:expr) => {{
        let resp: tide::Response = tide::Redirect::new($to).into();
        resp
    }};
}

use std::{thread, time::Duration};

use reqwest::{
    StatusCode,
    blocking::Client,
    header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    prompt::Message,
};

pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// A hosted chat model that turns messages into one answer.
pub trait CompletionModel: Send {
    fn model_id(&self) -> &str;

    fn complete(&self, messages: &[Message]) -> Result<String>;
}

/// Stand-in for commands that never ask the model anything.
pub struct Unconfigured;

impl CompletionModel for Unconfigured {
    fn model_id(&self) -> &str {
        "none"
    }

    fn complete(&self, _messages: &[Message]) -> Result<String> {
        Err(Error::Config(
            "no completion model configured; set GROQ_API_KEY".to_string(),
        ))
    }
}

/// Blocking client for OpenAI-compatible `/chat/completions` endpoints.
///
/// Decoding is deterministic (temperature 0). Transport failures, 429 and
/// 5xx responses are retried with a doubling delay; other statuses fail at
/// once.
pub struct ChatCompletionsClient {
    client: Client,
    endpoint: String,
    model: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl ChatCompletionsClient {
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(Error::Config(
                "missing completion API key".to_string(),
            ));
        }
        if model.trim().is_empty() {
            return Err(Error::Config("missing completion model".to_string()));
        }

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).map_err(|_| {
                Error::Config("invalid completion API key".to_string())
            })?,
        );
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/chat/completions",
                base_url.trim_end_matches('/')
            ),
            model: model.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    /// Override the retry budget and the first retry delay.
    pub fn with_retries(
        mut self,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_delay * (1 << attempt.min(5))
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request()
}

impl CompletionModel for ChatCompletionsClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn complete(&self, messages: &[Message]) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            temperature: 0.0,
            messages,
        };

        let mut attempt = 0u32;
        loop {
            match self.client.post(&self.endpoint).json(&request).send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        let parsed: ChatResponse = resp.json()?;
                        debug!(
                            model = %self.model,
                            attempt,
                            "completion received"
                        );
                        return first_answer(parsed);
                    }

                    let body = resp
                        .text()
                        .unwrap_or_else(|_| "<body unavailable>".to_string());
                    if should_retry(status) && attempt < self.max_retries {
                        attempt += 1;
                        warn!(
                            "completion returned {status}, retry {attempt}/{}",
                            self.max_retries
                        );
                        thread::sleep(self.backoff(attempt));
                        continue;
                    }
                    return Err(Error::Completion(format!(
                        "completion request failed ({status}): {body}"
                    )));
                }
                Err(err) => {
                    if is_retryable_error(&err) && attempt < self.max_retries
                    {
                        attempt += 1;
                        warn!(
                            "completion request failed: {err}, retry {attempt}/{}",
                            self.max_retries
                        );
                        thread::sleep(self.backoff(attempt));
                        continue;
                    }
                    return Err(err.into());
                }
            }
        }
    }
}

fn first_answer(response: ChatResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content.unwrap_or_default())
        .ok_or_else(|| {
            Error::Completion("response contained no choices".to_string())
        })
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: &'a [Message],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::{
        io::{BufRead, BufReader, Read, Write},
        net::TcpListener,
        sync::mpsc,
    };

    use super::*;

    /// Status that makes the fake server hang up without answering.
    const HANG_UP: u16 = 0;

    /// Serve one canned response per entry, sending each request body back
    /// over the channel.
    fn serve(
        responses: Vec<(u16, &'static str)>,
    ) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            for (status, body) in responses {
                let (stream, _) = listener.accept().unwrap();
                let mut reader = BufReader::new(stream);
                let mut content_length = 0;
                loop {
                    let mut line = String::new();
                    reader.read_line(&mut line).unwrap();
                    if line == "\r\n" || line.is_empty() {
                        break;
                    }
                    let lower = line.to_ascii_lowercase();
                    if let Some(v) = lower.strip_prefix("content-length:") {
                        content_length = v.trim().parse().unwrap();
                    }
                }
                let mut request_body = vec![0; content_length];
                reader.read_exact(&mut request_body).unwrap();
                tx.send(String::from_utf8(request_body).unwrap()).unwrap();

                if status == HANG_UP {
                    continue;
                }
                let mut stream = reader.into_inner();
                write!(
                    stream,
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                )
                .unwrap();
            }
        });

        (url, rx)
    }

    fn client(url: &str) -> ChatCompletionsClient {
        ChatCompletionsClient::new(
            "test-key",
            url,
            "test-model",
            Duration::from_secs(5),
        )
        .unwrap()
        .with_retries(2, Duration::ZERO)
    }

    const OK: &str = r#"{"choices":[{"message":{"role":"assistant","content":"Plug it in ✅"}}]}"#;

    #[test]
    fn endpoint_joins_base_url() {
        let c = ChatCompletionsClient::new(
            "k",
            "https://api.example.com/v1/",
            "m",
            DEFAULT_TIMEOUT,
        )
        .unwrap();
        assert_eq!(c.endpoint(), "https://api.example.com/v1/chat/completions");
        assert_eq!(c.model_id(), "m");
    }

    #[test]
    fn empty_key_is_config_error() {
        let err = ChatCompletionsClient::new(
            " ",
            DEFAULT_BASE_URL,
            DEFAULT_MODEL,
            DEFAULT_TIMEOUT,
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn completes_with_zero_temperature() {
        let (url, requests) = serve(vec![(200, OK)]);
        let answer = client(&url)
            .complete(&[Message::system("persona"), Message::user("how?")])
            .unwrap();
        assert_eq!(answer, "Plug it in ✅");

        let sent: serde_json::Value =
            serde_json::from_str(&requests.recv().unwrap()).unwrap();
        assert_eq!(sent["model"], "test-model");
        assert_eq!(sent["temperature"], 0.0);
        assert_eq!(sent["messages"][1]["role"], "user");
        assert_eq!(sent["messages"][1]["content"], "how?");
    }

    #[test]
    fn retries_server_errors() {
        let (url, requests) =
            serve(vec![(503, "{}"), (429, "{}"), (200, OK)]);
        let answer = client(&url).complete(&[Message::user("q")]).unwrap();
        assert_eq!(answer, "Plug it in ✅");
        assert_eq!(requests.iter().take(3).count(), 3);
    }

    #[test]
    fn gives_up_after_retry_budget() {
        let (url, _requests) =
            serve(vec![(500, "{}"), (500, "{}"), (500, "{}")]);
        let err = client(&url).complete(&[Message::user("q")]).unwrap_err();
        assert!(matches!(err, Error::Completion(_)));
    }

    #[test]
    fn retries_dropped_connections() {
        let (url, requests) = serve(vec![(HANG_UP, ""), (200, OK)]);
        let answer = client(&url).complete(&[Message::user("q")]).unwrap();
        assert_eq!(answer, "Plug it in ✅");
        assert_eq!(requests.iter().take(2).count(), 2);
    }

    #[test]
    fn transport_failures_surface_after_retry_budget() {
        let (url, requests) =
            serve(vec![(HANG_UP, ""), (HANG_UP, ""), (HANG_UP, "")]);
        let err = client(&url).complete(&[Message::user("q")]).unwrap_err();
        assert!(matches!(err, Error::Http(_)));
        // One attempt plus two retries.
        assert_eq!(requests.iter().count(), 3);
    }

    #[test]
    fn refused_connection_is_an_http_error() {
        let url = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            format!("http://{}", listener.local_addr().unwrap())
        };
        let err = client(&url).complete(&[Message::user("q")]).unwrap_err();
        match err {
            Error::Http(e) => assert!(e.is_connect()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn client_errors_are_not_retried() {
        let (url, _requests) = serve(vec![(401, r#"{"error":"bad key"}"#)]);
        let err = client(&url).complete(&[Message::user("q")]).unwrap_err();
        assert!(err.to_string().contains("401"));
    }
}

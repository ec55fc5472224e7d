use crate::error::Result;
use futures_util::future::BoxFuture;
use serde_json::Value as JsonValue;

/// One page of a paginated provider response.
#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<JsonValue>,
    pub next_token: Option<String>,
}

impl Page {
    pub fn new(items: Vec<JsonValue>, next_token: Option<String>) -> Self {
        Self { items, next_token }
    }

    pub fn last(items: Vec<JsonValue>) -> Self {
        Self {
            items,
            next_token: None,
        }
    }
}

type FetchPage<'a> = Box<dyn FnMut(Option<String>) -> BoxFuture<'a, Result<Page>> + Send + 'a>;

/// A lazy, finite, non-restartable sequence of pages. Each `next_page`
/// suspends on the fetch closure, which is where callers interleave their
/// throttle acquisition.
pub struct Paginator<'a> {
    fetch: FetchPage<'a>,
    next_token: Option<String>,
    exhausted: bool,
}

impl<'a> Paginator<'a> {
    pub fn new<F>(fetch: F) -> Self
    where
        F: FnMut(Option<String>) -> BoxFuture<'a, Result<Page>> + Send + 'a,
    {
        Self {
            fetch: Box::new(fetch),
            next_token: None,
            exhausted: false,
        }
    }

    pub async fn next_page(&mut self) -> Result<Option<Vec<JsonValue>>> {
        if self.exhausted {
            return Ok(None);
        }
        let page = (self.fetch)(self.next_token.take()).await?;
        match page.next_token {
            Some(token) => self.next_token = Some(token),
            None => self.exhausted = true,
        }
        Ok(Some(page.items))
    }

    /// Drains the remaining pages into one buffer.
    pub async fn collect_all(mut self) -> Result<Vec<JsonValue>> {
        let mut items = Vec::new();
        while let Some(page) = self.next_page().await? {
            items.extend(page);
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn paginator_follows_tokens_until_exhaustion() {
        let mut calls = Vec::new();
        let paginator = Paginator::new(move |token| {
            calls.push(token.clone());
            Box::pin(async move {
                Ok(match token.as_deref() {
                    None => Page::new(vec![json!(1)], Some("a".to_string())),
                    Some("a") => Page::new(vec![json!(2), json!(3)], Some("b".to_string())),
                    Some("b") => Page::last(vec![json!(4)]),
                    other => panic!("unexpected token {other:?}"),
                })
            })
        });

        let items = paginator.collect_all().await.unwrap();
        assert_eq!(items, vec![json!(1), json!(2), json!(3), json!(4)]);
    }

    #[tokio::test]
    async fn paginator_is_not_restartable() {
        let mut paginator = Paginator::new(|_| Box::pin(async { Ok(Page::last(vec![])) }));
        assert!(paginator.next_page().await.unwrap().is_some());
        assert!(paginator.next_page().await.unwrap().is_none());
        assert!(paginator.next_page().await.unwrap().is_none());
    }
}

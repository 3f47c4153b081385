use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::core::errors::Result;
use crate::flow::future::TaskFuture;

/// What a flow body may return: futures anywhere in the structure are
/// resolved to their values once the run has finished.
#[async_trait]
pub trait FlowOutput: Send {
    type Output: Send;

    async fn resolve_output(self) -> Result<Self::Output>;
}

#[async_trait]
impl FlowOutput for TaskFuture {
    type Output = Value;

    async fn resolve_output(self) -> Result<Value> {
        self.resolve().await
    }
}

#[async_trait]
impl FlowOutput for Value {
    type Output = Value;

    async fn resolve_output(self) -> Result<Value> {
        Ok(self)
    }
}

#[async_trait]
impl FlowOutput for () {
    type Output = ();

    async fn resolve_output(self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<T: FlowOutput> FlowOutput for Option<T> {
    type Output = Option<T::Output>;

    async fn resolve_output(self) -> Result<Self::Output> {
        match self {
            Some(inner) => Ok(Some(inner.resolve_output().await?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl<T: FlowOutput> FlowOutput for Vec<T> {
    type Output = Vec<T::Output>;

    async fn resolve_output(self) -> Result<Self::Output> {
        try_join_all(self.into_iter().map(FlowOutput::resolve_output)).await
    }
}

#[async_trait]
impl<T: FlowOutput> FlowOutput for BTreeMap<String, T> {
    type Output = BTreeMap<String, T::Output>;

    async fn resolve_output(self) -> Result<Self::Output> {
        let mut resolved = BTreeMap::new();
        for (key, item) in self {
            resolved.insert(key, item.resolve_output().await?);
        }
        Ok(resolved)
    }
}

#[async_trait]
impl<A: FlowOutput, B: FlowOutput> FlowOutput for (A, B) {
    type Output = (A::Output, B::Output);

    async fn resolve_output(self) -> Result<Self::Output> {
        Ok((self.0.resolve_output().await?, self.1.resolve_output().await?))
    }
}

#[async_trait]
impl<A: FlowOutput, B: FlowOutput, C: FlowOutput> FlowOutput for (A, B, C) {
    type Output = (A::Output, B::Output, C::Output);

    async fn resolve_output(self) -> Result<Self::Output> {
        Ok((
            self.0.resolve_output().await?,
            self.1.resolve_output().await?,
            self.2.resolve_output().await?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{InvocationId, RunId};
    use serde_json::json;

    #[tokio::test]
    async fn test_nested_outputs_resolve() {
        let run_id = RunId::new();
        let a = TaskFuture::new(run_id.clone(), InvocationId(0), "a");
        let b = TaskFuture::new(run_id, InvocationId(1), "b");
        a.set(Ok(json!(1))).unwrap();
        b.set(Ok(json!("two"))).unwrap();

        let mut map = BTreeMap::new();
        map.insert("b".to_string(), b);
        let output = (vec![a], map, json!(null));
        let (list, map, plain) = output.resolve_output().await.unwrap();

        assert_eq!(list, vec![json!(1)]);
        assert_eq!(map["b"], json!("two"));
        assert_eq!(plain, Value::Null);
    }

    #[tokio::test]
    async fn test_failed_future_fails_the_output() {
        let a = TaskFuture::new(RunId::new(), InvocationId(0), "a");
        a.set(Err(crate::FlowError::internal("nope"))).unwrap();
        assert!(Some(a).resolve_output().await.is_err());
    }
}

#![allow(dead_code)]

use apiverify::{
    ApiMethod, ContentKind, HttpExecutor, HttpMethod, HttpRequest, HttpResponse, MethodDescriptor, ProtocolError,
    ResourceLocator, TemplateRenderer,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Mock executor replaying scripted outcomes in order and recording every request.
/// Once the script runs out, the last outcome repeats.
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<Result<HttpResponse, ProtocolError>>>,
    last: Mutex<Option<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn respond(self, status: u16, body: &str) -> Self {
        self.script.lock().unwrap().push_back(Ok(HttpResponse::new(status, body)));
        self
    }

    pub fn fail(self, error: ProtocolError) -> Self {
        self.script.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpExecutor for ScriptedExecutor {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ProtocolError> {
        self.requests.lock().unwrap().push(request);

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(response)) => {
                *self.last.lock().unwrap() = Some(response.clone());
                Ok(response)
            }
            Some(Err(error)) => Err(error),
            None => self
                .last
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| ProtocolError::ConnectionFailed("no scripted response".to_string())),
        }
    }
}

/// Resource directory for templates, schemas and properties files
pub struct Resources {
    pub dir: TempDir,
}

impl Resources {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn with(self, path: &str, content: &str) -> Self {
        let full = self.dir.path().join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, content).unwrap();
        self
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn renderer(&self) -> TemplateRenderer {
        TemplateRenderer::new(ResourceLocator::new(self.root()))
    }
}

pub fn json_descriptor(name: &str, method: HttpMethod) -> MethodDescriptor {
    MethodDescriptor::new(name, method, "${base_url}/api/".to_string() + name)
}

pub fn xml_descriptor(name: &str, method: HttpMethod) -> MethodDescriptor {
    json_descriptor(name, method).with_content_kind(ContentKind::Xml)
}

/// Method wired to `executor` and `resources`, with base url `http://test.local`
pub fn api_method(descriptor: MethodDescriptor, executor: &Arc<ScriptedExecutor>, resources: &Resources) -> ApiMethod {
    ApiMethod::builder(descriptor, executor.clone())
        .renderer(resources.renderer())
        .base_url("http://test.local")
        .build()
}

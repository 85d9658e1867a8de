use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    #[envconfig(from = "API_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "API_PORT", default = "8000")]
    pub port: u16,

    #[envconfig(from = "SQLITE_DB_PATH", default = "./data/app.db")]
    pub sqlite_db_path: String,

    #[envconfig(from = "PDF_STORAGE_PATH", default = "./data/pdfs")]
    pub pdf_storage_path: String,

    #[envconfig(from = "DEFAULT_RENDER_MODE", default = "print_to_pdf")]
    pub default_render_mode: String,

    #[envconfig(from = "NAVIGATION_TIMEOUT_SECONDS", default = "45")]
    pub navigation_timeout_seconds: i32,

    #[envconfig(from = "JOB_TIMEOUT_SECONDS", default = "120")]
    pub job_timeout_seconds: i32,

    #[envconfig(from = "MAX_DOMAIN_WAIT_SECONDS", default = "600")]
    pub max_domain_wait_seconds: i32,

    #[envconfig(from = "MAX_RETRIES", default = "2")]
    pub max_retries: i32,

    #[envconfig(from = "WORKER_ID", default = "worker-1")]
    pub worker_id: String,

    #[envconfig(from = "MAX_BODY_SIZE", default = "1000000")]
    pub max_body_size: usize,
}

impl Config {
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn database_url(&self) -> String {
        format!("sqlite://{}", self.sqlite_db_path)
    }
}

use std::path::PathBuf;

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tracing::{debug, error, info};

use common::jobpack::extract_job_dict;
use common::{Error, MapFn, OutputFn, Params, ReduceFn, Result, Workload};

use crate::inputs::open_inputs;
use crate::map::{self, DEFAULT_MAX_OPEN};
use crate::protocol::Channel;
use crate::reduce::{self, Reduce, SortStep};
use crate::task::{Input, Output, Settings, Stage, Task};

/// Runs one stage of one task on behalf of the launcher.
pub struct Worker {
    map_fn: MapFn,
    reduce_fn: Option<ReduceFn>,
    sort: bool,
    sort_step: SortStep,
    on_output: Option<OutputFn>,
    work_dir: Option<PathBuf>,
    max_open_outputs: usize,
    client: reqwest::Client,
}

impl Worker {
    pub fn new(map_fn: MapFn) -> Self {
        Self {
            map_fn,
            reduce_fn: None,
            sort: false,
            sort_step: SortStep::default(),
            on_output: None,
            work_dir: None,
            max_open_outputs: DEFAULT_MAX_OPEN,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_workload(workload: Workload) -> Self {
        let worker = Self::new(workload.map_fn).sort(workload.sort);
        match workload.reduce_fn {
            Some(reduce_fn) => worker.reduce(reduce_fn),
            None => worker,
        }
    }

    /// Without a reduce function the terminal stage passes its inputs through.
    pub fn reduce(mut self, reduce_fn: ReduceFn) -> Self {
        self.reduce_fn = Some(reduce_fn);
        self
    }

    /// Sort reduce input before reducing.
    pub fn sort(mut self, enabled: bool) -> Self {
        self.sort = enabled;
        self
    }

    /// Replace the sort used when sorting is enabled.
    pub fn sort_with(mut self, step: SortStep) -> Self {
        self.sort_step = step;
        self
    }

    /// Run `hook` over the finished reduce output.
    pub fn on_output(mut self, hook: OutputFn) -> Self {
        self.on_output = Some(hook);
        self
    }

    /// Directory for output files. Defaults to the current directory, which
    /// the launcher sets up under `disco_data`.
    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn max_open_outputs(mut self, max: usize) -> Self {
        self.max_open_outputs = max;
        self
    }

    /// Serve the launcher on stdin/stdout.
    pub async fn run(&self) -> Result<()> {
        let mut channel = Channel::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout());
        self.run_with(&mut channel).await
    }

    /// Serve the launcher on an arbitrary channel.
    ///
    /// On failure the launcher is sent a `FATAL` message before the error
    /// is returned.
    pub async fn run_with<R, W>(&self, channel: &mut Channel<R, W>) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        match self.drive(channel).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!("worker failed: {e}");
                channel.fatal(&e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn drive<R, W>(&self, channel: &mut Channel<R, W>) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        channel.handshake().await?;

        let task = channel.task().await?;
        info!("task {} of {} ({} stage)", task.taskid, task.jobname, task.stage);

        let jobdict = extract_job_dict(&task.jobfile).await?;
        let params = match jobdict.get("params") {
            None | Some(Value::Null) => Params::new(),
            Some(Value::Object(params)) => params.clone(),
            Some(other) => return Err(Error::decode(format!("job params must be an object, got {other}"))),
        };
        let settings = Settings::from_task(&task)?;

        let inputs = channel.inputs().await?;
        debug!("{} inputs", inputs.len());

        let outputs = self.dispatch(&task, &settings, &params, &inputs).await?;
        for output in &outputs {
            channel.output(output).await?;
        }

        channel.done().await?;
        info!("task {} done with {} outputs", task.taskid, outputs.len());
        Ok(())
    }

    async fn dispatch(&self, task: &Task, settings: &Settings, params: &Params, inputs: &[Input]) -> Result<Vec<Output>> {
        let work_dir = match &self.work_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };

        match (task.stage, self.reduce_fn) {
            (Stage::Map, _) => {
                let input = open_inputs(&self.client, settings, inputs).await?;
                map::run(
                    self.map_fn,
                    params,
                    input,
                    settings,
                    &work_dir,
                    task.taskid,
                    self.max_open_outputs,
                )
                .await
            }
            (Stage::MapShuffle, _) | (Stage::Reduce, None) => Ok(inputs.iter().map(Output::passthrough).collect()),
            (Stage::ReduceShuffle, _) => {
                let input = open_inputs(&self.client, settings, inputs).await?;
                let output = reduce::shuffle(input, settings, &work_dir, task.taskid).await?;
                Ok(vec![output])
            }
            (Stage::Reduce, Some(reduce_fn)) => {
                let input = open_inputs(&self.client, settings, inputs).await?;
                let stage = Reduce {
                    reduce_fn,
                    sort: self.sort.then_some(self.sort_step),
                    on_output: self.on_output,
                    params,
                    work_dir: &work_dir,
                    taskid: task.taskid,
                };
                Ok(vec![stage.run(input, settings).await?])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read, Write};
    use std::path::Path;

    use bytes::Bytes;
    use serde_json::json;

    use common::home::WorkerPayload;
    use common::jobpack::JobPack;
    use common::Emitter;

    use super::*;
    use crate::task::tests::task_json;

    fn frame(key: &str, payload: &str) -> String {
        format!("{key} {} {payload}\n", payload.len())
    }

    fn write_jobfile(dir: &Path, params: Option<Value>) -> PathBuf {
        let mut pack = JobPack::new(WorkerPayload::Archive(Bytes::from_static(b"zip")));
        pack.set_dict("prefix", "wc");
        if let Some(params) = params {
            pack.set_dict("params", params);
        }
        let path = dir.join("jobfile");
        std::fs::write(&path, pack.encode().unwrap()).unwrap();
        path
    }

    /// Replies for a full run: handshake, task, inputs, one ack per output
    /// and the final ack.
    fn script(task: Value, inputs: Value, outputs: usize) -> String {
        let mut replies = frame("OK", "\"ok\"");
        replies += &frame("TASK", &task.to_string());
        replies += &frame("INPUT", &inputs.to_string());
        for _ in 0..outputs {
            replies += &frame("OK", "\"ok\"");
        }
        replies += &frame("OK", "\"ok\"");
        replies
    }

    async fn run(worker: &Worker, replies: String) -> (Result<()>, String) {
        let mut channel = Channel::new(Cursor::new(replies.into_bytes()), Vec::new());
        let result = worker.run_with(&mut channel).await;
        let (_, written) = channel.into_parts();
        (result, String::from_utf8(written).unwrap())
    }

    fn sent_keys(written: &str) -> Vec<&str> {
        written
            .lines()
            .filter_map(|line| line.split(' ').next())
            .filter(|key| key.chars().all(|c| c.is_ascii_uppercase()) && !key.is_empty())
            .collect()
    }

    fn by_value(input: &mut dyn Read, emit: &mut Emitter, params: &Params) -> anyhow::Result<()> {
        assert_eq!(params["suffix"], "!");
        let mut text = String::new();
        input.read_to_string(&mut text)?;
        for line in text.lines() {
            let label = if line == "v2" { 1 } else { 0 };
            emit.emit(format!("{line}!"), label)?;
        }
        Ok(())
    }

    fn noop_map(_: &mut dyn Read, _: &mut Emitter, _: &Params) -> anyhow::Result<()> {
        Ok(())
    }

    fn count_lines(input: &mut dyn Read, output: &mut dyn Write, _: &Params) -> anyhow::Result<()> {
        let mut text = String::new();
        input.read_to_string(&mut text)?;
        writeln!(output, "{}", text.lines().count())?;
        Ok(())
    }

    #[tokio::test]
    async fn map_stage_partitions_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let jobfile = write_jobfile(dir.path(), Some(json!({"suffix": "!"})));
        let task = task_json("map", dir.path().to_str().unwrap(), jobfile.to_str().unwrap());
        let inputs = json!(["done", [
            [0, "ok", 0, [[0, "raw://v1\nv2\n"]]],
            [1, "ok", 0, [[0, "raw://v3\n"]]]
        ]]);

        let worker = Worker::new(by_value).work_dir(dir.path());
        let (result, written) = run(&worker, script(task, inputs, 2)).await;
        result.unwrap();

        assert_eq!(sent_keys(&written), vec!["WORKER", "TASK", "INPUT", "OUTPUT", "OUTPUT", "DONE"]);
        assert!(written.contains(r#"[0,"disco://nodeA/disco/map_out_3_0",8]"#));
        assert!(written.contains(r#"[1,"disco://nodeA/disco/map_out_3_1",4]"#));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("map_out_3_0")).unwrap(),
            "v1!\nv3!\n"
        );
        assert_eq!(std::fs::read_to_string(dir.path().join("map_out_3_1")).unwrap(), "v2!\n");
    }

    #[tokio::test]
    async fn map_shuffle_passes_inputs_through() {
        let dir = tempfile::tempdir().unwrap();
        let jobfile = write_jobfile(dir.path(), None);
        let task = task_json("map_shuffle", dir.path().to_str().unwrap(), jobfile.to_str().unwrap());
        let inputs = json!(["done", [
            [0, "ok", 2, [[0, "disco://nodeB/disco/a"]]],
            [1, "ok", "all", [[0, "disco://nodeC/disco/b"]]]
        ]]);

        let worker = Worker::new(noop_map);
        let (result, written) = run(&worker, script(task, inputs, 2)).await;
        result.unwrap();

        assert!(written.contains(r#"OUTPUT 29 [2,"disco://nodeB/disco/a",0]"#));
        assert!(written.contains(r#"OUTPUT 30 [-1,"disco://nodeC/disco/b",0]"#));
    }

    #[tokio::test]
    async fn terminal_stage_without_reduce_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let jobfile = write_jobfile(dir.path(), None);
        let task = task_json("reduce", dir.path().to_str().unwrap(), jobfile.to_str().unwrap());
        let inputs = json!(["done", [[0, "ok", 0, [[0, "http://nodeB/x"]]]]]);

        let (result, written) = run(&Worker::new(noop_map), script(task, inputs, 1)).await;
        result.unwrap();
        assert!(written.contains(r#"[0,"http://nodeB/x",0]"#));
    }

    #[tokio::test]
    async fn reduce_stage_writes_one_output() {
        let dir = tempfile::tempdir().unwrap();
        let jobfile = write_jobfile(dir.path(), None);
        let task = task_json("reduce", dir.path().to_str().unwrap(), jobfile.to_str().unwrap());
        let inputs = json!(["done", [
            [0, "ok", 0, [[0, "raw://b 1\na 1\n"]]],
            [1, "ok", 0, [[0, "raw://c 1\n"]]]
        ]]);

        let worker = Worker::new(noop_map)
            .reduce(count_lines)
            .sort(true)
            .sort_with(SortStep::spill())
            .work_dir(dir.path());
        let (result, written) = run(&worker, script(task, inputs, 1)).await;
        result.unwrap();

        assert!(written.contains(r#"[0,"disco://nodeA/disco/reduce_out_3",2]"#));
        assert_eq!(std::fs::read_to_string(dir.path().join("reduce_out_3")).unwrap(), "3\n");
    }

    #[tokio::test]
    async fn rejected_handshake_is_fatal() {
        let (result, written) = run(&Worker::new(noop_map), frame("ERROR", "\"go away\"")).await;

        assert!(matches!(result, Err(Error::Protocol(_))));
        assert_eq!(sent_keys(&written), vec!["WORKER", "FATAL"]);
    }

    #[tokio::test]
    async fn port_mismatch_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let jobfile = write_jobfile(dir.path(), None);
        let mut task = task_json("map", dir.path().to_str().unwrap(), jobfile.to_str().unwrap());
        task["disco_port"] = json!(1234);

        let (result, written) = run(&Worker::new(noop_map), script(task, json!(["done", []]), 0)).await;

        assert!(matches!(result, Err(Error::Protocol(_))));
        assert_eq!(sent_keys(&written), vec!["WORKER", "TASK", "FATAL"]);
    }

    #[tokio::test]
    async fn params_must_be_an_object() {
        let dir = tempfile::tempdir().unwrap();
        let jobfile = write_jobfile(dir.path(), Some(json!([1, 2])));
        let task = task_json("map", dir.path().to_str().unwrap(), jobfile.to_str().unwrap());

        let (result, _) = run(&Worker::new(noop_map), script(task, json!(["done", []]), 0)).await;
        assert!(matches!(result, Err(Error::Decode(_))));
    }
}

//! One complete evaluation of a job: download, queue, drive, assemble.

use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::models::{EvaluationResult, Job};
use crate::domain::ports::GenerationRequest;
use crate::services::audio_loader::AudioLoader;
use crate::services::candidate_queue::CandidateQueueBuilder;
use crate::services::credential_pool::CredentialPool;
use crate::services::evaluation_driver::{EvaluationDriver, EvaluationError};
use crate::services::prompt_builder::build_instruction;
use crate::services::result_assembler::ResultAssembler;

/// Generation parameters shared by every call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub result: EvaluationResult,
    /// `None` when the result could not be stored
    pub result_id: Option<Uuid>,
}

#[derive(Clone)]
pub struct EvaluationService {
    audio: AudioLoader,
    queue: CandidateQueueBuilder,
    pool: CredentialPool,
    driver: EvaluationDriver,
    assembler: ResultAssembler,
    generation: GenerationSettings,
}

impl EvaluationService {
    pub fn new(
        audio: AudioLoader,
        queue: CandidateQueueBuilder,
        pool: CredentialPool,
        driver: EvaluationDriver,
        assembler: ResultAssembler,
        generation: GenerationSettings,
    ) -> Self {
        Self {
            audio,
            queue,
            pool,
            driver,
            assembler,
            generation,
        }
    }

    /// Evaluate `job` as the run `run_token`. Pool credentials locked for the
    /// run are released whatever the outcome.
    #[instrument(skip(self, job, header_key), fields(job_id = %job.id, run_token = %run_token))]
    pub async fn evaluate(
        &self,
        job: &Job,
        run_token: Uuid,
        header_key: Option<&str>,
    ) -> Result<EvaluationOutcome, EvaluationError> {
        let attachments = self
            .audio
            .load(&job.segments)
            .await
            .map_err(|e| EvaluationError::AudioUnavailable(e.to_string()))?;

        let request = GenerationRequest {
            attachments,
            instruction: build_instruction(&job.segments),
            temperature: self.generation.temperature,
            max_output_tokens: self.generation.max_output_tokens,
        };

        let driven = match self
            .queue
            .build(run_token, &job.user_id, header_key, self.driver.models())
            .await
        {
            Ok(candidates) => {
                self.driver
                    .drive(job.id, run_token, &job.segments, &candidates, &request)
                    .await
            }
            Err(e) => Err(e.into()),
        };
        self.pool.release(run_token).await;
        let success = driven?;

        let result = self
            .assembler
            .assemble(
                job,
                success.report,
                &success.model,
                success.caller_provided_key,
                self.audio.public_urls(&job.segments),
            )
            .ok_or_else(|| {
                EvaluationError::Failed(format!("model {} returned a report without scores", success.model))
            })?;
        let result_id = self.assembler.persist(&result).await;
        info!(
            model = %result.model,
            overall_score = result.overall_score,
            stored = result_id.is_some(),
            "Evaluation finished"
        );
        Ok(EvaluationOutcome { result, result_id })
    }
}

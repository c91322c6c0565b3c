use anyhow::{anyhow, bail, Context, Result};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{Embedding, LayerNorm, Linear, VarBuilder};
use std::path::Path;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::info;

use crate::embed::EmbeddingProvider;

/// sentence-transformers truncates all-MiniLM-L6-v2 inputs at 256 tokens.
pub const MAX_SEQ_LEN: usize = 256;

struct BertConfig {
    hidden_size: usize,
    intermediate_size: usize,
    num_attention_heads: usize,
    num_hidden_layers: usize,
    vocab_size: usize,
    max_position_embeddings: usize,
    type_vocab_size: usize,
    layer_norm_eps: f64,
}

impl BertConfig {
    fn all_minilm_l6_v2() -> Self {
        Self {
            hidden_size: 384,
            intermediate_size: 1536,
            num_attention_heads: 12,
            num_hidden_layers: 6,
            vocab_size: 30522,
            max_position_embeddings: 512,
            type_vocab_size: 2,
            layer_norm_eps: 1e-12,
        }
    }

    fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }
}

struct Attention {
    query: Linear,
    key: Linear,
    value: Linear,
    out: Linear,
    norm: LayerNorm,
    heads: usize,
    head_dim: usize,
}

impl Attention {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let h = config.hidden_size;
        let self_vb = vb.pp("self");
        let out_vb = vb.pp("output");

        Ok(Self {
            query: candle_nn::linear(h, h, self_vb.pp("query"))?,
            key: candle_nn::linear(h, h, self_vb.pp("key"))?,
            value: candle_nn::linear(h, h, self_vb.pp("value"))?,
            out: candle_nn::linear(h, h, out_vb.pp("dense"))?,
            norm: candle_nn::layer_norm(h, config.layer_norm_eps, out_vb.pp("LayerNorm"))?,
            heads: config.num_attention_heads,
            head_dim: config.head_dim(),
        })
    }

    /// (batch, seq, hidden) -> (batch, heads, seq, head_dim)
    fn split_heads(&self, x: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, _) = x.dims3()?;
        Ok(x
            .reshape((batch, seq_len, self.heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?)
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, _) = x.dims3()?;
        let q = self.split_heads(&self.query.forward(x)?)?;
        let k = self.split_heads(&self.key.forward(x)?)?;
        let v = self.split_heads(&self.value.forward(x)?)?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = q.matmul(&k.t()?)?.affine(scale, 0.0)?;
        let probs = candle_nn::ops::softmax_last_dim(&scores)?;
        let context = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq_len, self.heads * self.head_dim))?;

        // post-norm residual
        let residual = (x + self.out.forward(&context)?)?;
        Ok(self.norm.forward(&residual)?)
    }
}

struct FeedForward {
    up: Linear,
    down: Linear,
    norm: LayerNorm,
}

impl FeedForward {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        let (h, i) = (config.hidden_size, config.intermediate_size);
        Ok(Self {
            up: candle_nn::linear(h, i, vb.pp("intermediate").pp("dense"))?,
            down: candle_nn::linear(i, h, vb.pp("output").pp("dense"))?,
            norm: candle_nn::layer_norm(
                h,
                config.layer_norm_eps,
                vb.pp("output").pp("LayerNorm"),
            )?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let y = self.down.forward(&self.up.forward(x)?.gelu_erf()?)?;
        Ok(self.norm.forward(&(x + y)?)?)
    }
}

struct EncoderLayer {
    attention: Attention,
    ffn: FeedForward,
}

impl EncoderLayer {
    fn load(vb: VarBuilder, config: &BertConfig) -> Result<Self> {
        Ok(Self {
            attention: Attention::load(vb.pp("attention"), config)?,
            ffn: FeedForward::load(vb, config)?,
        })
    }

    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.ffn.forward(&self.attention.forward(x)?)
    }
}

struct BertEncoder {
    words: Embedding,
    positions: Embedding,
    token_types: Embedding,
    norm: LayerNorm,
    layers: Vec<EncoderLayer>,
    max_positions: usize,
    device: Device,
}

impl BertEncoder {
    fn load(path: &Path, device: &Device) -> Result<Self> {
        let config = BertConfig::all_minilm_l6_v2();
        let h = config.hidden_size;

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device)? };
        let emb = vb.pp("embeddings");

        let layers = (0..config.num_hidden_layers)
            .map(|i| EncoderLayer::load(vb.pp(format!("encoder.layer.{i}")), &config))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            words: candle_nn::embedding(config.vocab_size, h, emb.pp("word_embeddings"))?,
            positions: candle_nn::embedding(
                config.max_position_embeddings,
                h,
                emb.pp("position_embeddings"),
            )?,
            token_types: candle_nn::embedding(
                config.type_vocab_size,
                h,
                emb.pp("token_type_embeddings"),
            )?,
            norm: candle_nn::layer_norm(h, config.layer_norm_eps, emb.pp("LayerNorm"))?,
            layers,
            max_positions: config.max_position_embeddings,
            device: device.clone(),
        })
    }

    fn forward(&self, token_ids: &[u32]) -> Result<Vec<f32>> {
        let seq_len = token_ids.len();
        if seq_len == 0 {
            bail!("cannot embed an empty token sequence");
        }
        if seq_len > self.max_positions {
            bail!("input length {seq_len} exceeds max {}", self.max_positions);
        }

        let ids = Tensor::new(token_ids, &self.device)?.unsqueeze(0)?;
        let positions = Tensor::arange(0u32, seq_len as u32, &self.device)?.unsqueeze(0)?;
        let token_types = ids.zeros_like()?;

        let embedded = ((self.words.forward(&ids)? + self.positions.forward(&positions)?)?
            + self.token_types.forward(&token_types)?)?;
        let mut hidden = self.norm.forward(&embedded)?;
        for layer in &self.layers {
            hidden = layer.forward(&hidden)?;
        }

        mean_pool_normalized(&hidden)
    }
}

/// Mean over the sequence axis, then L2-normalize.
fn mean_pool_normalized(hidden: &Tensor) -> Result<Vec<f32>> {
    let pooled = hidden.mean(1)?.squeeze(0)?;
    let norm: f32 = pooled.sqr()?.sum_all()?.sqrt()?.to_scalar()?;
    let pooled = if norm > 0.0 {
        pooled.affine(1.0 / norm as f64, 0.0)?
    } else {
        pooled
    };
    Ok(pooled.to_vec1::<f32>()?)
}

/// all-MiniLM-L6-v2 sentence embeddings computed on the CPU with candle.
pub struct MiniLmEmbeddingProvider {
    encoder: BertEncoder,
    tokenizer: Tokenizer,
}

impl MiniLmEmbeddingProvider {
    pub fn load(model_path: &Path, tokenizer_path: &Path) -> Result<Self> {
        let device = Device::Cpu;
        let encoder = BertEncoder::load(model_path, &device)
            .with_context(|| format!("load model {}", model_path.display()))?;

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow!("load tokenizer {}: {e}", tokenizer_path.display()))?;
        tokenizer.with_padding(None);
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQ_LEN,
                ..Default::default()
            }))
            .map_err(|e| anyhow!("configure truncation: {e}"))?;

        info!(model = %model_path.display(), "loaded MiniLM embedding model");
        Ok(Self { encoder, tokenizer })
    }
}

impl EmbeddingProvider for MiniLmEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("tokenize: {e}"))?;
        self.encoder.forward(encoding.get_ids())
    }
}
